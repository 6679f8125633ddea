use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::upload::session::UploadProgress;

#[derive(Parser, Debug)]
#[command(name = "rbv")]
#[command(about = "Post-process recordings on a running audio host and upload them", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: ./config.toml, then the user config dir)
    #[arg(short, long, global = true, env = "RBV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process recordings on the audio host, then upload the results
    ///
    /// Without FILES, new recordings are fetched from the preprocess folders.
    Process {
        /// Local audio files, processed in order
        files: Vec<PathBuf>,

        /// Treat local files as live recordings: normalize only
        /// (default: compressor + limiter)
        #[arg(long)]
        live: bool,

        /// Do not ask before processing fetched recordings
        #[arg(short, long)]
        yes: bool,
    },

    /// Upload a file without processing it
    Upload {
        file: PathBuf,

        /// Remote path (default: upload folder + file name)
        remote: Option<String>,

        /// Replace an existing file at the remote path
        #[arg(long)]
        overwrite: bool,
    },

    /// Authorize this app and write a config file
    Init,

    /// Check config, host pipe and account access
    Doctor,
}

/// Line-based prompts for interactive commands.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl Prompter<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Ask until a non-empty answer is given.
    pub fn ask(&mut self, label: &str) -> io::Result<String> {
        loop {
            let answer = self.read_answer(&format!("{}: ", label))?;
            if !answer.is_empty() {
                return Ok(answer);
            }
        }
    }

    /// Ask once, falling back to `default` on an empty answer.
    pub fn ask_or(&mut self, label: &str, default: &str) -> io::Result<String> {
        let answer = self.read_answer(&format!("{} [{}]: ", label, default))?;
        if answer.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(answer)
        }
    }

    /// Yes/no question. An empty answer takes `default`.
    pub fn confirm(&mut self, question: &str, default: bool) -> io::Result<bool> {
        let hint = if default { "Y/n" } else { "y/N" };
        let answer = self.read_answer(&format!("{} ({}) ", question, hint))?;
        Ok(match answer.to_ascii_lowercase().as_str() {
            "" => default,
            "y" | "yes" => true,
            _ => false,
        })
    }

    /// Print a line of output between prompts.
    pub fn say(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.output, "{}", line)
    }

    fn read_answer(&mut self, prompt: &str) -> io::Result<String> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input closed before an answer was given",
            ));
        }
        Ok(line.trim().to_string())
    }
}

/// Progress bar driven by upload progress reports.
pub fn upload_progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%)",
    )
    .map(|s| s.progress_chars("=> "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Move `bar` to the position in `progress`.
pub fn show_progress(bar: &ProgressBar, progress: &UploadProgress) {
    bar.set_length(progress.total_bytes);
    bar.set_position(progress.bytes_sent);
    bar.set_message(progress.remote_path.to_string());
}
