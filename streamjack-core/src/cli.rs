//! Command-line surfaces for the two binaries: `-u`/`-b` for the sender,
//! `-b`/`-p` for the receiver; `-h`/`--help` and exit codes are `clap`'s
//! defaults.

use clap::Parser;

use crate::config::DEFAULT_PORT;

/// `streamjack-sender`: streams the local audio graph to a remote receiver.
#[derive(Debug, Parser)]
#[command(name = "streamjack-sender", version, about)]
pub struct SenderArgs {
    /// Target address, `host` or `host:port` (port defaults to 8080).
    #[arg(short = 'u', long = "url", default_value = "localhost:8080")]
    pub url: String,

    /// Base name of the external capture ports this sender's fixed
    /// `output_TCP_<i>` ports connect to, e.g. `system:capture_`.
    #[arg(short = 'b', long = "base-name", default_value = "system:capture_")]
    pub base_name: String,

    /// Log verbosity (`-v`, `-vv`); overrides `RUST_LOG` if set.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl SenderArgs {
    /// Splits `url` into `(host, port)`, defaulting the port to 8080 when
    /// absent.
    pub fn target(&self) -> (String, u16) {
        match self.url.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (self.url.clone(), DEFAULT_PORT),
            },
            None => (self.url.clone(), DEFAULT_PORT),
        }
    }
}

/// `streamjack-receiver`: accepts connections and plays each session's
/// stream into the local audio graph.
#[derive(Debug, Parser)]
#[command(name = "streamjack-receiver", version, about)]
pub struct ReceiverArgs {
    /// Base name for each session's downstream playback ports.
    #[arg(short = 'b', long = "base-name", default_value = "system:playback_")]
    pub base_name: String,

    /// Listen port.
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Log verbosity (`-v`, `-vv`); overrides `RUST_LOG` if set.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_splits_host_and_port() {
        let args = SenderArgs {
            url: "studio.local:9000".into(),
            base_name: "x".into(),
            verbose: 0,
        };
        assert_eq!(args.target(), ("studio.local".to_string(), 9000));
    }

    #[test]
    fn target_defaults_port_when_absent() {
        let args = SenderArgs {
            url: "studio.local".into(),
            base_name: "x".into(),
            verbose: 0,
        };
        assert_eq!(args.target(), ("studio.local".to_string(), DEFAULT_PORT));
    }
}
