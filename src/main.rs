use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use stormline_core::{AppError, Config};
use stormline_weather::{DisplayFragment, WeatherSegment};

/// Weather and rain-window segment for status lines
#[derive(Debug, Parser)]
#[command(name = "stormline", version, about)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Command {
    /// Print one line every render interval until interrupted
    Watch,
}

/// Write one JSON line of fragments.
///
/// Returns `Ok(false)` once the reader has gone away.
fn print_line(out: &mut impl Write, fragments: &[DisplayFragment]) -> Result<bool, AppError> {
    let line = serde_json::to_string(fragments).context("Failed to serialize fragments")?;
    match writeln!(out, "{}", line).and_then(|()| out.flush()) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let (config, _) = match &cli.config {
        Some(path) => Config::load_validated_from(path)?,
        None => Config::load_validated()?,
    };
    tracing::debug!("Using configuration in {}", config.config_dir.display());

    let segment = WeatherSegment::from_settings(&config.weather)?;

    if cli.command != Some(Command::Watch) {
        let rendered = segment.render().await;
        print_line(&mut io::stdout().lock(), &rendered.fragments)?;
        return Ok(());
    }

    tracing::info!("stormline started");
    let mut ticker = tokio::time::interval(config.weather.render_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let rendered = segment.render().await;
                if !print_line(&mut io::stdout().lock(), &rendered.fragments)? {
                    tracing::info!("Output closed, shutting down");
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = stormline_core::init() {
        eprintln!("{}", e);
    }

    if let Err(e) = run(cli).await {
        tracing::error!("{}", e);
        eprintln!("stormline: {}", e.user_message());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "no space left"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_cli_defaults_to_single_render() {
        let cli = Cli::try_parse_from(["stormline"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_watch_with_config() {
        let cli = Cli::try_parse_from(["stormline", "--config", "/tmp/stormline.toml", "watch"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/stormline.toml")));
        assert_eq!(cli.command, Some(Command::Watch));
    }

    #[test]
    fn test_cli_rejects_unknown_arguments() {
        assert!(Cli::try_parse_from(["stormline", "--verbose"]).is_err());
        assert!(Cli::try_parse_from(["stormline", "--config"]).is_err());
    }

    #[test]
    fn test_print_line_writes_json() {
        let mut out = Vec::new();
        let fragments = [DisplayFragment::new("9°C").styled(["weather_temp"])];

        assert!(print_line(&mut out, &fragments).unwrap());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[{\"text\":\"9°C\",\"style_tags\":[\"weather_temp\"]}]\n"
        );
    }

    #[test]
    fn test_print_line_closed_output_is_not_an_error() {
        assert!(!print_line(&mut ClosedPipe, &[DisplayFragment::new("x")]).unwrap());
    }

    #[test]
    fn test_print_line_other_write_errors_propagate() {
        let err = print_line(&mut FullDisk, &[DisplayFragment::new("x")]).unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }
}
