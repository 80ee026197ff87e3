mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "lamb", version, about = "Lamb rendezvous broker and session client")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "lamb",
            "send",
            "127.0.0.1:30000",
            "--id",
            "42",
            "--type",
            "mt",
            "--command",
            "submit",
            "--data",
            "13800138000 hello",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send subcommand");
        };
        assert_eq!(args.target.id, 42);
        assert_eq!(args.target.client_type, lamb_fabric::ClientType::Mt);
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "lamb",
            "send",
            "127.0.0.1:30000",
            "--id",
            "1",
            "--data",
            "hello",
            "--file",
            "/tmp/record.bin",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn client_type_accepts_name_or_code() {
        let cli = Cli::try_parse_from([
            "lamb", "pull", "127.0.0.1:30000", "--id", "9", "--type", "2",
        ])
        .expect("numeric type should parse");
        let Command::Pull(args) = cli.command else {
            panic!("expected pull subcommand");
        };
        assert_eq!(args.target.client_type, lamb_fabric::ClientType::Mo);
    }

    #[test]
    fn rejects_unknown_client_type() {
        let err = Cli::try_parse_from([
            "lamb", "hello", "127.0.0.1:30000", "--id", "1", "--type", "fax",
        ])
        .expect_err("unknown type should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_serve_with_defaults() {
        let cli = Cli::try_parse_from(["lamb", "serve"]).expect("serve should parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve subcommand");
        };
        assert_eq!(args.port, lamb_fabric::DEFAULT_CONTROL_PORT);
        assert_eq!(args.record_size, lamb_fabric::DEFAULT_RECORD_SIZE);
    }
}
