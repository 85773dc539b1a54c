//! Command line interface

use std::ffi::OsString;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use net_transport::{DEFAULT_SSH_PORT, TransportConfig};

use crate::credentials::PasswordSource;

/// Log filter used when neither `--log-level` nor `RUST_LOG` is given
pub const DEFAULT_LOG_FILTER: &str = "sshpass_proxy=info,net_transport=info";

#[derive(Debug, Parser)]
#[command(
    name = "sshpass-proxy",
    version,
    about = "SSH proxy that logs into the target with a password",
    long_about = "Speaks SSH on stdin/stdout, accepting any authentication from the client, \
                  and logs into the target server with the given password. Meant to be used \
                  as an ssh ProxyCommand."
)]
pub struct Cli {
    /// Target server, HOST:PORT (port defaults to 22)
    #[arg(short = 'a', long = "address", value_name = "HOST:PORT")]
    pub address: String,

    /// Password given on the command line
    #[arg(short = 'p', long = "password", value_name = "PASSWORD")]
    pub password: Option<OsString>,

    /// Read the password from a file
    #[arg(short = 'f', long = "password-file", value_name = "FILE")]
    pub password_file: Option<PathBuf>,

    /// Read the password from the SSHPASS environment variable
    #[arg(short = 'e', long = "env")]
    pub password_env: bool,

    /// Host key presented to the client (PKCS#8 PEM, Ed25519)
    #[arg(short = 'k', long = "host-key", value_name = "FILE")]
    pub host_key: Option<PathBuf>,

    /// Seconds allowed for each SSH handshake
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub handshake_timeout: u64,

    /// Seconds allowed to open the TCP connection
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub connect_timeout: u64,

    /// Log filter, e.g. `debug` or `net_transport=trace`
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,
}

impl Cli {
    /// First password source given, in `-p`, `-f`, `-e` order
    pub fn password_source(&self) -> Option<PasswordSource> {
        if let Some(password) = &self.password {
            Some(PasswordSource::Literal(password.clone()))
        } else if let Some(path) = &self.password_file {
            Some(PasswordSource::File(path.clone()))
        } else if self.password_env {
            Some(PasswordSource::Env)
        } else {
            None
        }
    }

    /// Target address with the default port filled in
    pub fn target(&self) -> String {
        let address = self.address.trim();
        if address.parse::<SocketAddr>().is_ok() {
            return address.to_string();
        }
        if let Ok(ip) = address.parse::<IpAddr>() {
            return SocketAddr::new(ip, DEFAULT_SSH_PORT).to_string();
        }
        match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
                address.to_string()
            }
            _ => format!("{}:{}", address, DEFAULT_SSH_PORT),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::default()
            .with_handshake_timeout(Duration::from_secs(self.handshake_timeout))
    }

    /// Filter directive for the subscriber
    pub fn log_filter(&self) -> Option<String> {
        self.log_level.as_ref().map(|level| {
            if level.contains('=') {
                level.clone()
            } else {
                format!("sshpass_proxy={0},net_transport={0}", level)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sshpass-proxy").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_address_required() {
        assert!(Cli::try_parse_from(["sshpass-proxy", "-p", "x"]).is_err());
    }

    #[test]
    fn test_password_precedence() {
        let cli = parse(&["-a", "host:22", "-p", "pw", "-f", "/tmp/pw", "-e"]);
        assert!(matches!(cli.password_source(), Some(PasswordSource::Literal(p)) if p == "pw"));

        let cli = parse(&["-a", "host:22", "-f", "/tmp/pw", "-e"]);
        assert!(matches!(cli.password_source(), Some(PasswordSource::File(_))));

        let cli = parse(&["-a", "host:22", "-e"]);
        assert!(matches!(cli.password_source(), Some(PasswordSource::Env)));

        let cli = parse(&["-a", "host:22"]);
        assert!(cli.password_source().is_none());
    }

    #[test]
    fn test_target_default_port() {
        assert_eq!(parse(&["-a", "example.com"]).target(), "example.com:22");
        assert_eq!(parse(&["-a", "example.com:2222"]).target(), "example.com:2222");
        assert_eq!(parse(&["-a", "10.0.0.1"]).target(), "10.0.0.1:22");
        assert_eq!(parse(&["-a", "::1"]).target(), "[::1]:22");
        assert_eq!(parse(&["-a", "[::1]:2200"]).target(), "[::1]:2200");
    }

    #[test]
    fn test_timeouts_and_log_filter() {
        let cli = parse(&[
            "-a",
            "h:1",
            "--handshake-timeout",
            "5",
            "--connect-timeout",
            "2",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.transport_config().handshake_timeout, Duration::from_secs(5));
        assert_eq!(cli.connect_timeout(), Duration::from_secs(2));
        assert_eq!(
            cli.log_filter().as_deref(),
            Some("sshpass_proxy=debug,net_transport=debug")
        );

        let cli = parse(&["-a", "h:1"]);
        assert_eq!(cli.transport_config().handshake_timeout, Duration::from_secs(30));
        assert_eq!(cli.log_filter(), None);
    }
}
