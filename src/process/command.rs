//! Structured media command construction
//!
//! Argument lists are built from typed parts instead of concatenated
//! strings, so quoting and ordering mistakes cannot reach the subprocess.

use std::path::PathBuf;
use std::process::Stdio;

use bytes::Bytes;
use tokio::process::Command;

/// Input specification for a media tool invocation
#[derive(Debug, Clone)]
pub enum InputSource {
    /// Remote or local URL read directly by the tool
    Url(String),
    /// Local file
    File(PathBuf),
    /// Ordered frame list in concat format
    ConcatList(PathBuf),
    /// In-memory bytes written to the tool's stdin
    Buffer(Bytes),
}

/// Output specification for a media tool invocation
#[derive(Debug, Clone)]
pub enum OutputSink {
    /// Network target (e.g. an `srtp://` URL)
    Target(String),
    /// Local file
    File(PathBuf),
    /// Captured stdout
    Stdout,
}

/// One media tool invocation: input, output, and their option lists
#[derive(Debug, Clone)]
pub struct MediaCommand {
    input: InputSource,
    output: OutputSink,
    input_options: Vec<String>,
    output_options: Vec<String>,
}

impl MediaCommand {
    pub fn new(input: InputSource, output: OutputSink) -> Self {
        Self {
            input,
            output,
            input_options: Vec::new(),
            output_options: Vec::new(),
        }
    }

    /// Append one input option token
    pub fn input_option(mut self, option: impl Into<String>) -> Self {
        self.input_options.push(option.into());
        self
    }

    /// Append a sequence of input option tokens
    pub fn input_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_options.extend(options.into_iter().map(Into::into));
        self
    }

    /// Append one output option token
    pub fn output_option(mut self, option: impl Into<String>) -> Self {
        self.output_options.push(option.into());
        self
    }

    /// Append a sequence of output option tokens
    pub fn output_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_options
            .extend(options.into_iter().map(Into::into));
        self
    }

    /// Bytes that must be written to the child's stdin, if any
    pub fn stdin_payload(&self) -> Option<Bytes> {
        match &self.input {
            InputSource::Buffer(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Whether the output is captured from stdout
    pub fn captures_stdout(&self) -> bool {
        matches!(self.output, OutputSink::Stdout)
    }

    /// Full argument list in invocation order
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // Input options come first; the concat demuxer needs its format
        // flags ahead of -i.
        if let InputSource::ConcatList(_) = self.input {
            args.extend(["-f", "concat", "-safe", "0"].map(String::from));
        }
        args.extend(self.input_options.iter().cloned());

        args.push("-i".to_string());
        args.push(match &self.input {
            InputSource::Url(url) => url.clone(),
            InputSource::File(path) | InputSource::ConcatList(path) => {
                path.to_string_lossy().into_owned()
            }
            InputSource::Buffer(_) => "pipe:".to_string(),
        });

        args.extend(self.output_options.iter().cloned());

        args.push(match &self.output {
            OutputSink::Target(url) => url.clone(),
            OutputSink::File(path) => path.to_string_lossy().into_owned(),
            OutputSink::Stdout => "-".to_string(),
        });

        args
    }

    /// Build the subprocess invocation
    ///
    /// Stderr is always piped (diagnostic scanning); stdout is piped for
    /// both capture and progress observation; stdin only for buffer inputs.
    pub fn build(&self, processor: &str) -> Command {
        let mut command = Command::new(processor);
        command
            .args(self.args())
            .stdin(if self.stdin_payload().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl std::fmt::Display for MediaCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.args().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_input_arg_order() {
        let cmd = MediaCommand::new(
            InputSource::Url("http://cam/img.jpg".to_string()),
            OutputSink::Stdout,
        )
        .input_options(["-stream_loop", "-1"])
        .output_options(["-frames:v", "1", "-f", "image2"]);

        assert_eq!(
            cmd.args(),
            vec![
                "-stream_loop",
                "-1",
                "-i",
                "http://cam/img.jpg",
                "-frames:v",
                "1",
                "-f",
                "image2",
                "-"
            ]
        );
    }

    #[test]
    fn test_concat_input_gets_format_flags() {
        let cmd = MediaCommand::new(
            InputSource::ConcatList(PathBuf::from("/tmp/frames.txt")),
            OutputSink::File(PathBuf::from("/tmp/out.mp4")),
        );

        let args = cmd.args();
        assert_eq!(&args[..4], &["-f", "concat", "-safe", "0"]);
        assert_eq!(&args[4..6], &["-i", "/tmp/frames.txt"]);
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[test]
    fn test_buffer_input_uses_stdin() {
        let cmd = MediaCommand::new(
            InputSource::Buffer(Bytes::from_static(b"jpeg-bytes")),
            OutputSink::Stdout,
        );

        assert!(cmd.stdin_payload().is_some());
        assert!(cmd.captures_stdout());
        assert_eq!(cmd.args(), vec!["-i", "pipe:", "-"]);
    }

    #[test]
    fn test_target_output() {
        let cmd = MediaCommand::new(
            InputSource::File(PathBuf::from("/tmp/stitch.mp4")),
            OutputSink::Target("srtp://10.0.0.5:50000?rtcpport=50000".to_string()),
        )
        .output_options(["-f", "rtp"]);

        let args = cmd.args();
        assert!(!cmd.captures_stdout());
        assert_eq!(args.last().unwrap(), "srtp://10.0.0.5:50000?rtcpport=50000");
    }
}
