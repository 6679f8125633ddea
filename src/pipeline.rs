//! Batch pipeline.
//!
//! For each input file: stage a host-friendly copy (from local disk, or
//! downloaded from a preprocess folder), run the processing recipe on the
//! host, upload the export, then optionally archive it with a server-side
//! copy. Work files never outlive their step.

use crate::config::{remote_join, Config};
use crate::error::{Error, Result};
use crate::pipe::channel::{connect, ChannelPaths};
use crate::pipe::client::PipeClient;
use crate::pipe::recipe::{self, Profile};
use crate::upload::chunked::ChunkedUploader;
use crate::upload::session::UploadProgress;
use crate::upload::transport::{RemoteCopy, RemoteFile, RemoteSource, RemoteStore};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Where a job's raw recording comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A file on local disk, left untouched
    Local(PathBuf),
    /// A file in a remote preprocess folder, downloaded for processing
    Remote(RemoteFile),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(path) => write!(f, "{}", path.display()),
            Source::Remote(file) => f.write_str(&file.path),
        }
    }
}

/// One input file and the effect chain it gets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub source: Source,
    pub profile: Profile,
}

impl Job {
    pub fn local(input: impl Into<PathBuf>, profile: Profile) -> Self {
        Self {
            source: Source::Local(input.into()),
            profile,
        }
    }

    pub fn remote(file: RemoteFile, profile: Profile) -> Self {
        Self {
            source: Source::Remote(file),
            profile,
        }
    }

    /// Name the processed file is uploaded under.
    pub fn file_name(&self) -> Result<String> {
        let name = match &self.source {
            Source::Local(path) => path.file_name().and_then(|n| n.to_str()),
            Source::Remote(file) => Some(file.name.as_str()),
        };
        name.filter(|n| !n.is_empty() && !n.contains('/'))
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("not a usable file name: {}", self.source),
                ))
            })
    }
}

/// Outcome of a batch that ran to the end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Remote paths of uploaded files
    pub uploaded: Vec<String>,
    /// Inputs that were skipped, with the reason
    pub skipped: Vec<(String, String)>,
}

/// True for names with an `.mp3` extension, in any case.
pub fn is_mp3(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"))
}

/// Orchestrator for processing and uploading a batch of files
pub struct Pipeline<T> {
    uploader: ChunkedUploader<T>,
    upload_dir: String,
    archive_dir: Option<String>,
    work_dir: PathBuf,
}

impl<T: RemoteStore> Pipeline<T> {
    pub fn new(
        uploader: ChunkedUploader<T>,
        upload_dir: impl Into<String>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            uploader,
            upload_dir: upload_dir.into(),
            archive_dir: None,
            work_dir,
        }
    }

    /// Pipeline for the folders and upload limits in `config`, staging work
    /// files in `rbv` under the system temp directory.
    pub fn from_config(transport: T, config: &Config) -> Result<Self> {
        let uploader = ChunkedUploader::from_config(transport, &config.upload);
        let work_dir = std::env::temp_dir().join("rbv");
        std::fs::create_dir_all(&work_dir)?;
        Ok(Self::new(uploader, config.require_upload_dir()?, work_dir)
            .with_archive_dir(Some(config.paths.postprocess_archive.clone())))
    }

    /// Also copy each upload into `dir`. Blank means no archiving.
    pub fn with_archive_dir(mut self, dir: Option<String>) -> Self {
        self.archive_dir = dir.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn uploader(&self) -> &ChunkedUploader<T> {
        &self.uploader
    }

    /// Import and export paths for `name`.
    ///
    /// The host's importer chokes on spaces, so they become `-` here; the
    /// remote name keeps them.
    pub fn work_paths(&self, name: &str) -> (PathBuf, PathBuf) {
        let safe = name.replace(' ', "-");
        (
            self.work_dir.join(format!("im-{}", safe)),
            self.work_dir.join(format!("ex-{}", safe)),
        )
    }

    /// Recordings waiting in `folders`, in folder order.
    ///
    /// Only `.mp3` files are picked up, and a file whose name is already in
    /// the archive folder is treated as done.
    pub async fn pending_jobs(&self, folders: &[(Profile, &str)]) -> Result<Vec<Job>> {
        let store = self.uploader.transport();
        let archived: HashSet<String> = match &self.archive_dir {
            Some(dir) => store
                .list_files(dir)
                .await?
                .into_iter()
                .map(|file| file.name)
                .collect(),
            None => HashSet::new(),
        };

        let mut jobs = Vec::new();
        for &(profile, folder) in folders {
            let pending: Vec<Job> = store
                .list_files(folder)
                .await?
                .into_iter()
                .filter(|file| is_mp3(&file.name) && !archived.contains(&file.name))
                .map(|file| Job::remote(file, profile))
                .collect();
            if pending.is_empty() {
                info!(folder, "No new files to process");
            } else {
                info!(
                    folder,
                    profile = profile.as_str(),
                    count = pending.len(),
                    "Found files to process"
                );
            }
            jobs.extend(pending);
        }
        Ok(jobs)
    }

    /// Put the job's raw recording at `import_path`.
    async fn stage(&self, job: &Job, import_path: &Path) -> Result<()> {
        let staged = match &job.source {
            Source::Local(input) => tokio::fs::copy(input, import_path)
                .await
                .map(|_| ())
                .map_err(Error::from),
            Source::Remote(file) => {
                info!(remote_path = %file.path, "Downloading");
                self.uploader
                    .transport()
                    .download(&file.path, import_path)
                    .await
                    .map(|_| ())
            }
        };
        if staged.is_err() {
            remove_work_file(import_path).await;
        }
        staged
    }

    /// Process and upload one file. Returns the remote path.
    pub async fn process_file<R, W, F>(
        &self,
        pipe: &mut PipeClient<R, W>,
        job: &Job,
        on_progress: F,
    ) -> Result<String>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        F: FnMut(&UploadProgress),
    {
        let name = job.file_name()?;
        let (import_path, export_path) = self.work_paths(&name);

        self.stage(job, &import_path).await?;
        let processed = recipe::process(pipe, &import_path, &export_path, job.profile).await;
        remove_work_file(&import_path).await;
        if let Err(e) = processed {
            remove_work_file(&export_path).await;
            return Err(e);
        }

        let remote_path = remote_join(&self.upload_dir, &name);
        info!(remote_path = %remote_path, "Uploading");
        let uploaded = self
            .uploader
            .upload_file(&export_path, &remote_path, on_progress)
            .await;
        remove_work_file(&export_path).await;
        uploaded?;

        if let Some(archive_dir) = &self.archive_dir {
            let archive_path = remote_join(archive_dir, &name);
            self.uploader
                .transport()
                .copy(&remote_path, &archive_path)
                .await?;
            info!(archive_path = %archive_path, "Archived");
        }

        Ok(remote_path)
    }

    /// Run every job in order over one channel.
    ///
    /// A file over the size ceiling is skipped; any other failure stops the
    /// batch and is returned.
    pub async fn run_batch<R, W, F>(
        &self,
        pipe: &mut PipeClient<R, W>,
        jobs: &[Job],
        mut on_progress: F,
    ) -> Result<BatchReport>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        F: FnMut(&UploadProgress),
    {
        let mut report = BatchReport::default();
        for (i, job) in jobs.iter().enumerate() {
            info!(
                input = %job.source,
                profile = job.profile.as_str(),
                "[{}/{}] Processing",
                i + 1,
                jobs.len()
            );
            match self.process_file(pipe, job, &mut on_progress).await {
                Ok(remote_path) => report.uploaded.push(remote_path),
                Err(e) if !e.aborts_batch() => {
                    warn!(input = %job.source, error = %e, "Skipping");
                    report.skipped.push((job.source.to_string(), e.to_string()));
                }
                Err(e) => {
                    error!(input = %job.source, error = %e, "Aborting batch");
                    return Err(e);
                }
            }
        }
        Ok(report)
    }
}

/// Open the host channel, build the pipeline and its job list, run the
/// batch, and close the channel whatever the outcome.
///
/// `plan` runs only once the channel is open, so a host that is not running
/// is reported before any remote store is contacted.
pub async fn run_on_host<T, B, Fut, F>(
    paths: &ChannelPaths,
    response_timeout: Option<Duration>,
    plan: B,
    on_progress: F,
) -> Result<BatchReport>
where
    T: RemoteStore,
    B: FnOnce() -> Fut,
    Fut: Future<Output = Result<(Pipeline<T>, Vec<Job>)>>,
    F: FnMut(&UploadProgress),
{
    let mut pipe = connect(paths).await?.with_response_timeout(response_timeout);
    let result = match plan().await {
        Ok((pipeline, jobs)) => pipeline.run_batch(&mut pipe, &jobs, on_progress).await,
        Err(e) => Err(e),
    };
    pipe.close().await;
    result
}

async fn remove_work_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "Could not remove work file"),
    }
}

// =============================================================================
// Tests
// =============================================================================
