use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tether_core::{
    classify, is_valid, normalize, redirect_path, ConnectConfig, ConnectionStore,
    JsonFileStorage, RemoteId,
};

const USAGE: &str = "\
usage: tether [--storage <file>] <command>

commands:
  status              show the saved connection
  forget              remove the saved connection
  redirect            print the redirect path for the saved connection
  check <remote-id>   normalize and validate a remote ID
  channel <version>   print the release channel for a server version
  config              print the effective connection settings";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Status,
    Forget,
    Redirect,
    Check(String),
    Channel(String),
    Config,
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    storage: Option<PathBuf>,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut storage = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--storage" {
            let path = iter.next().context("--storage needs a path")?;
            storage = Some(PathBuf::from(path));
        } else {
            rest.push(arg.as_str());
        }
    }

    let command = match rest.as_slice() {
        ["status"] => Command::Status,
        ["forget"] => Command::Forget,
        ["redirect"] => Command::Redirect,
        ["check", id] => Command::Check(id.to_string()),
        ["channel", version] => Command::Channel(version.to_string()),
        ["config"] => Command::Config,
        [] => bail!("missing command\n\n{}", USAGE),
        other => bail!("unrecognized arguments: {}\n\n{}", other.join(" "), USAGE),
    };
    Ok(Invocation { storage, command })
}

fn open_store(storage: Option<PathBuf>) -> ConnectionStore {
    let storage = match storage {
        Some(path) => JsonFileStorage::new(path),
        None => JsonFileStorage::default_location(),
    };
    log::debug!("Using storage at {}", storage.path().display());
    ConnectionStore::new(Arc::new(storage))
}

fn run(invocation: Invocation) -> Result<()> {
    match invocation.command {
        Command::Status => {
            let store = open_store(invocation.storage);
            match store.load() {
                Some(saved) => {
                    println!("{} ({})", saved.name, saved.remote_id);
                    println!("version: {}", saved.version);
                    println!("channel: {}", saved.channel);
                    if saved.needs_channel_check() {
                        println!("channel unconfirmed until the next connection");
                    }
                }
                None => println!("no saved connection"),
            }
        }
        Command::Forget => {
            open_store(invocation.storage).clear()?;
            println!("saved connection removed");
        }
        Command::Redirect => {
            let store = open_store(invocation.storage);
            let saved = store.load().context("no saved connection")?;
            let remote_id = RemoteId::parse(&saved.remote_id)?;
            println!("{}", redirect_path(saved.channel, &remote_id));
        }
        Command::Check(raw) => {
            let normalized = normalize(&raw);
            if !is_valid(&normalized) {
                bail!("{:?} is not a valid remote ID", raw);
            }
            println!("{}", normalized);
        }
        Command::Channel(version) => println!("{}", classify(&version)),
        Command::Config => {
            let config = ConnectConfig::load(&tether_core::config::config_path());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = parse_args(&args).and_then(run);
    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(
            parse_args(&args(&["channel", "2.0.0b1"])).unwrap().command,
            Command::Channel("2.0.0b1".to_string())
        );
        assert_eq!(
            parse_args(&args(&["status"])).unwrap(),
            Invocation {
                storage: None,
                command: Command::Status
            }
        );
    }

    #[test]
    fn storage_flag_anywhere() {
        let invocation = parse_args(&args(&["forget", "--storage", "/tmp/s.json"])).unwrap();
        assert_eq!(invocation.storage, Some(PathBuf::from("/tmp/s.json")));
        assert_eq!(invocation.command, Command::Forget);
    }

    #[test]
    fn rejects_bad_usage() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&args(&["check"])).is_err());
        assert!(parse_args(&args(&["status", "--storage"])).is_err());
        assert!(parse_args(&args(&["launch"])).is_err());
    }

    #[test]
    fn check_rejects_invalid_id() {
        let invocation = Invocation {
            storage: None,
            command: Command::Check("short".to_string()),
        };
        assert!(run(invocation).is_err());
    }

    #[test]
    fn redirect_without_saved_connection_fails() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = Invocation {
            storage: Some(dir.path().join("storage.json")),
            command: Command::Redirect,
        };
        assert!(run(invocation).is_err());
    }
}
