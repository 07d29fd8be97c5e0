use std::env;
use std::path::PathBuf;

/// Default decode timeout when `--timeout` is not given
pub const DEFAULT_DECODE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub screenshot: PathBuf,
    pub catalog: PathBuf,
    pub icons: PathBuf,
    pub training: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub strict: bool,
    pub debug_mode: bool,
    pub decode_timeout_ms: u64,
}

impl Args {
    pub fn parse() -> Option<Self> {
        let args: Vec<String> = env::args().collect();
        Self::parse_from(args.iter().skip(1).map(String::as_str))
    }

    /// Parse flags without the program name. Prints help or an error and
    /// returns `None` when the binary should exit.
    pub fn parse_from<'a>(args: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut screenshot: Option<PathBuf> = None;
        let mut catalog: Option<PathBuf> = None;
        let mut icons: Option<PathBuf> = None;
        let mut training: Option<PathBuf> = None;
        let mut config: Option<PathBuf> = None;
        let mut strict = false;
        let mut debug_mode = false;
        let mut timeout_ms = DEFAULT_DECODE_TIMEOUT_MS;

        for arg in args {
            if arg == "--help" || arg == "-h" {
                print_help();
                return None;
            } else if arg == "--version" || arg == "-v" {
                println!("MegaBonk Vision v{}", env!("CARGO_PKG_VERSION"));
                return None;
            } else if arg == "--debug" {
                debug_mode = true;
            } else if arg == "--strict" {
                strict = true;
            } else if let Some(val) = arg.strip_prefix("--screenshot=") {
                screenshot = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--catalog=") {
                catalog = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--icons=") {
                icons = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--training=") {
                training = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--config=") {
                config = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--timeout=") {
                match val.parse::<u64>() {
                    Ok(ms) => timeout_ms = ms,
                    Err(_) => {
                        eprintln!("❌ Invalid timeout value: {}", val);
                        return None;
                    }
                }
            } else {
                eprintln!("❌ Unknown argument: {}", arg);
                print_help();
                return None;
            }
        }

        let (Some(screenshot), Some(catalog), Some(icons)) = (screenshot, catalog, icons) else {
            eprintln!("❌ --screenshot, --catalog and --icons are required");
            print_help();
            return None;
        };

        Some(Args {
            screenshot,
            catalog,
            icons,
            training,
            config,
            strict,
            debug_mode,
            decode_timeout_ms: timeout_ms,
        })
    }
}

fn print_help() {
    println!("🎮 MegaBonk Vision - screenshot item detection");
    println!();
    println!("USAGE:");
    println!("    megabonk-vision --screenshot=<png> --catalog=<json> --icons=<dir> [FLAGS]");
    println!();
    println!("FLAGS:");
    println!("    --screenshot=PATH   Screenshot to scan (PNG, JPEG or WebP)");
    println!("    --catalog=PATH      Item catalog JSON");
    println!("    --icons=DIR         Directory holding the item icons");
    println!("    --training=PATH     Training sample index JSON (samples next to it)");
    println!("    --config=PATH       Partial detection config JSON");
    println!("    --strict            Drop detections whose border shows another rarity");
    println!("    --timeout=MS        Decode timeout in milliseconds (default 10000)");
    println!("    --debug             Enable debug logging");
    println!("    --help, -h          Show this help message");
    println!("    --version, -v       Show version information");
    println!();
    println!("EXAMPLES:");
    println!("    megabonk-vision --screenshot=run.png --catalog=items.json --icons=icons/");
    println!("    megabonk-vision --screenshot=run.png --catalog=items.json --icons=icons/ --strict --debug");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_required_and_optional_flags() {
        let args = Args::parse_from([
            "--screenshot=shot.png",
            "--catalog=items.json",
            "--icons=icons",
            "--training=training/index.json",
            "--strict",
            "--timeout=2500",
        ])
        .unwrap();
        assert_eq!(args.screenshot, PathBuf::from("shot.png"));
        assert_eq!(args.icons, PathBuf::from("icons"));
        assert_eq!(args.training, Some(PathBuf::from("training/index.json")));
        assert_eq!(args.config, None);
        assert!(args.strict);
        assert!(!args.debug_mode);
        assert_eq!(args.decode_timeout_ms, 2500);
    }

    #[test]
    fn test_missing_required_flag() {
        assert!(Args::parse_from(["--screenshot=shot.png", "--catalog=items.json"]).is_none());
    }

    #[test]
    fn test_invalid_timeout() {
        assert!(
            Args::parse_from([
                "--screenshot=a.png",
                "--catalog=b.json",
                "--icons=c",
                "--timeout=soon",
            ])
            .is_none()
        );
    }
}
