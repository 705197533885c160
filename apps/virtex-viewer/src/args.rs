//! Command line options.

use std::path::PathBuf;

/// Viewer options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerArgs {
    /// Compressed image to stream. A synthetic image is used when absent.
    pub image: Option<PathBuf>,
    /// Frames to paint before quitting.
    pub frames: u64,
    /// Viewport size.
    pub width: u32,
    pub height: u32,
    /// Run on the software device instead of Vulkan.
    pub emulated: bool,
    /// Fill every page synchronously at startup instead of streaming.
    pub fill: bool,
    /// Disable validation layers.
    pub no_validation: bool,
    pub help: bool,
}

impl Default for ViewerArgs {
    fn default() -> Self {
        Self {
            image: None,
            frames: 120,
            width: 1280,
            height: 720,
            emulated: false,
            fill: false,
            no_validation: false,
            help: false,
        }
    }
}

impl ViewerArgs {
    /// Parse the process arguments.
    pub fn from_args() -> Self {
        Self::parse(std::env::args().skip(1))
    }

    /// Parse `args`, ignoring unknown flags and malformed values.
    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut parsed = Self::default();
        let mut args = args.into_iter().peekable();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => parsed.help = true,
                "--emulated" => parsed.emulated = true,
                "--fill" => parsed.fill = true,
                "--no-validation" => parsed.no_validation = true,
                "--frames" => {
                    if let Some(v) = args.peek().and_then(|v| v.parse().ok()) {
                        parsed.frames = v;
                        args.next();
                    }
                }
                "--size" => {
                    if let Some((w, h)) = args.peek().and_then(|v| parse_size(v)) {
                        parsed.width = w;
                        parsed.height = h;
                        args.next();
                    }
                }
                other if !other.starts_with('-') => parsed.image = Some(PathBuf::from(other)),
                other => tracing::warn!("Ignoring unknown option {other}"),
            }
        }

        parsed
    }
}

/// Parse `WIDTHxHEIGHT`.
fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ViewerArgs {
        ViewerArgs::parse(args.iter().map(ToString::to_string))
    }

    #[test]
    fn defaults() {
        assert_eq!(parse(&[]), ViewerArgs::default());
    }

    #[test]
    fn all_options() {
        let args = parse(&[
            "--frames",
            "10",
            "--emulated",
            "--fill",
            "--no-validation",
            "--size",
            "640x480",
            "image.astc",
        ]);
        assert_eq!(args.frames, 10);
        assert!(args.emulated && args.fill && args.no_validation);
        assert_eq!((args.width, args.height), (640, 480));
        assert_eq!(args.image, Some(PathBuf::from("image.astc")));
        assert!(!args.help);
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let args = parse(&["--frames", "many", "--size", "big"]);
        assert_eq!(args.frames, 120);
        assert_eq!((args.width, args.height), (1280, 720));
        // Unconsumed values are taken as the image path
        assert_eq!(args.image, Some(PathBuf::from("big")));
    }

    #[test]
    fn help_flag() {
        assert!(parse(&["-h"]).help);
        assert!(parse(&["--help"]).help);
    }
}
