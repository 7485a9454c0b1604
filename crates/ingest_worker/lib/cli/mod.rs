use crate::build_info;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    about = "Steam review ingestion service: top games -> reviews -> landing zone -> warehouse",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[arg(long)]
    /// Run one ingestion and exit instead of serving the trigger endpoint
    pub once: bool,

    #[arg(long)]
    /// Listen address for the trigger endpoint (defaults to 0.0.0.0:$PORT)
    pub bind: Option<String>,

    #[arg(long)]
    /// Skip the outbound connectivity probe at startup
    pub skip_network_check: bool,

    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use crate::build_info;
    use clap::{error::ErrorKind, Parser};

    #[test]
    fn version_short_circuits_other_flags() {
        let err = Cli::try_parse_from(["ingest_worker", "--version", "--no-such-flag"])
            .expect_err("clap stops at --version");

        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
        assert!(err.to_string().contains(build_info::VERSION_WITH_COMMIT));
    }

    #[test]
    fn defaults_to_serving_with_network_check() {
        let cli = Cli::try_parse_from(["ingest_worker"]).expect("no args is valid");
        assert!(!cli.once);
        assert!(!cli.skip_network_check);
        assert_eq!(cli.bind, None);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn once_mode_with_custom_bind() {
        let cli = Cli::try_parse_from(["ingest_worker", "--once", "--bind", "127.0.0.1:9000"])
            .expect("valid flags");
        assert!(cli.once);
        assert_eq!(cli.bind.as_deref(), Some("127.0.0.1:9000"));
    }
}
