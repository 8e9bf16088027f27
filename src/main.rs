use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sumsock::{protocol, Client, ServeMode, Server};

// Runs the server: reclaims the socket path, listens and sums client input
// one connection at a time until SIGINT/SIGTERM.
fn run_server(backlog: i32, mode: ServeMode) -> anyhow::Result<()> {
    let socket_path = protocol::SOCKET_NAME;
    let endpoint = sumsock::prepare_endpoint(socket_path)?.listen(backlog)?;
    let server = Server::new(endpoint).with_mode(mode);

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || shutdown.trigger()).context("signal handler")?;

    info!(path = socket_path, backlog, mode = ?mode, "Server is running");
    server.serve_forever()?;
    Ok(())
}

// Runs one client session. Numbers given on the command line are sent as-is,
// otherwise the operator is prompted on stdin.
fn run_client(numbers: Option<Vec<i32>>) -> anyhow::Result<()> {
    let mut client = Client::connect(protocol::SOCKET_NAME)?;
    match numbers {
        Some(numbers) => {
            let sent = client.send_values(numbers);
            info!(sent, "Finished sending");
            let reply = client.read_reply()?;
            println!("Received from server : {}", reply);
        }
        None => {
            sumsock::run_interactive(&mut client, io::stdin().lock(), io::stdout().lock())?;
        }
    }
    Ok(())
}

fn cli() -> Command {
    Command::new("sumsock")
        .about("Sums integers sent over a UNIX socket")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("server")
                .about("Listen on the UNIX socket and sum what each client sends")
                .arg(
                    Arg::new("backlog")
                        .short('b')
                        .long("backlog")
                        .help("Pending connections to queue")
                        .default_value("20")
                        .value_parser(validate_backlog),
                )
                .arg(
                    Arg::new("concurrent")
                        .long("concurrent")
                        .help("Serve each client on its own thread")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("client")
                .about("Send integers to the server and print the result")
                .arg(
                    Arg::new("numbers")
                        .help("Integers to send; prompts on stdin when omitted")
                        .num_args(1..)
                        .allow_negative_numbers(true)
                        .value_parser(clap::value_parser!(i32)),
                ),
        )
}

fn dispatch(matches: &ArgMatches) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("server", sub_m)) => {
            let backlog = *sub_m
                .get_one::<i32>("backlog")
                .context("missing backlog")?;
            let mode = if sub_m.get_flag("concurrent") {
                ServeMode::Concurrent
            } else {
                ServeMode::Sequential
            };
            run_server(backlog, mode)
        }
        Some(("client", sub_m)) => {
            let numbers = sub_m
                .get_many::<i32>("numbers")
                .map(|values| values.copied().collect());
            run_client(numbers)
        }
        _ => anyhow::bail!("Invalid command"),
    }
}

// Main entry point of the application.
// Both sides rendezvous at the compiled-in protocol::SOCKET_NAME.
// Usage:
//   server [--backlog N] [--concurrent]
//   client [NUMBERS...]
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let matches = cli().get_matches();
    match dispatch(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn validate_backlog(value: &str) -> Result<i32, String> {
    match value.parse::<i32>() {
        Ok(backlog) if backlog > 0 => Ok(backlog),
        _ => Err(format!("Invalid backlog: {}", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn client_accepts_negative_numbers() {
        let matches = cli()
            .try_get_matches_from(["sumsock", "client", "5", "10", "-3", "0"])
            .unwrap();
        let (_, sub_m) = matches.subcommand().unwrap();
        let numbers: Vec<i32> = sub_m.get_many::<i32>("numbers").unwrap().copied().collect();
        assert_eq!(numbers, vec![5, 10, -3, 0]);
    }

    #[test]
    fn socket_path_cannot_be_overridden() {
        for sub in ["server", "client"] {
            let result = cli().try_get_matches_from(["sumsock", sub, "--socket", "/tmp/other"]);
            assert!(result.is_err());
        }
    }

    #[test]
    fn backlog_must_be_positive() {
        assert_eq!(validate_backlog("20"), Ok(20));
        assert!(validate_backlog("0").is_err());
        assert!(validate_backlog("many").is_err());
    }
}
