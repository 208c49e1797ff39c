use crate::config::BackendKind;
use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Terminal console for a single port-forward tunnel session",
    long_about = "Drives a port-forward backend and shows the session state, live send/receive\n\
                  byte counts and the number of multiplexed connections.\n\
                  Settings are read from ~/.config/tunnel_console/config.conf and can be\n\
                  overridden on the command line."
)]
pub struct Args {
    /// Backend to drive
    #[arg(short, long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Address of the backend process (ipc backend)
    #[arg(short = 'a', long)]
    pub backend_addr: Option<String>,

    /// Initial local listen IP
    #[arg(short, long)]
    pub local: Option<String>,

    /// Initial local listen port
    #[arg(short = 'p', long)]
    pub local_port: Option<u16>,

    /// Initial remote IP
    #[arg(short, long)]
    pub remote: Option<String>,

    /// Initial remote port
    #[arg(short = 'P', long)]
    pub remote_port: Option<u16>,

    /// Initial user name
    #[arg(short, long)]
    pub user: Option<String>,

    /// Number of telemetry samples kept for the chart
    #[arg(short = 'n', long)]
    pub max_samples: Option<usize>,

    /// Quiet mode: no activity log
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_flags() {
        let args = Args::parse_from([
            "tunnel_console",
            "-b",
            "simulate",
            "--remote",
            "10.0.0.5",
            "-P",
            "2222",
            "-q",
        ]);
        assert_eq!(args.backend, Some(BackendKind::Simulate));
        assert_eq!(args.remote.as_deref(), Some("10.0.0.5"));
        assert_eq!(args.remote_port, Some(2222));
        assert!(args.quiet);
        assert!(args.user.is_none());
    }

    #[test]
    fn backend_accepts_alias_and_rejects_unknown_names() {
        let args = Args::parse_from(["tunnel_console", "--backend", "sim"]);
        assert_eq!(args.backend, Some(BackendKind::Simulate));
        let args = Args::parse_from(["tunnel_console", "-b", "ipc"]);
        assert_eq!(args.backend, Some(BackendKind::Ipc));
        assert!(Args::try_parse_from(["tunnel_console", "-b", "carrier-pigeon"]).is_err());
    }

    #[test]
    fn out_of_range_port_flag_is_rejected() {
        assert!(Args::try_parse_from(["tunnel_console", "--local-port", "70000"]).is_err());
    }
}
