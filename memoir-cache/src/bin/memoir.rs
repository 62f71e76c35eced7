/// memoir - inspect and prune a memoization store
///
/// Usage: memoir <command> [args]
///
/// The store is opened from MEMOIR_STORAGE_LOCATION (and MEMOIR_PREFIX),
/// like an engine built with `CacheEngine::from_env`.
use std::process::ExitCode;

use memoir_cache::{init_tracing, CacheEngine, LogFormat};
use memoir_core::{
    is_valid, ArtifactRole, CacheKey, CodecKind, Envelope, MemoConfig, MemoError, MemoResult,
};
use memoir_storage::{ArtifactAddress, EntryAddress, FunctionAddress, StorageAdapter};
use serde_json::Value;

const USAGE: &str = "\
Usage: memoir <command> [args]

Commands:
  functions                                List stored functions
  list <function> [--exceptions|--inputs]  List keys with a stored output (or failure, or input)
  history <function> <key> <role>          List current and archived artifacts of one role
  show <function> <key> <role[.stamp]>     Print one artifact's metadata and payload
  invalidate <function> [<key>]            Remove one entry, or every entry of a function

Environment:
  MEMOIR_STORAGE_LOCATION  memory://, temp://, file:///path or lmdb:///path (default temp://)
  MEMOIR_PREFIX            Base path segment shared by all functions
  MEMOIR_LOG_FORMAT        plain or json (default plain)";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Functions,
    List { function: String, role: ArtifactRole },
    History { function: String, key: CacheKey, role: ArtifactRole },
    Show { function: String, key: CacheKey, role: ArtifactRole, stamp: Option<i64> },
    Invalidate { function: String, key: Option<CacheKey> },
}

fn parse_key(raw: &str) -> Result<CacheKey, String> {
    raw.parse().map_err(|e: memoir_core::ParseCacheKeyError| e.to_string())
}

fn parse_role(raw: &str) -> Result<(ArtifactRole, Option<i64>), String> {
    let (role, stamp) = match raw.split_once('.') {
        Some((role, stamp)) => {
            let stamp = stamp
                .parse::<i64>()
                .map_err(|e| format!("invalid archive stamp {stamp:?}: {e}"))?;
            (role, Some(stamp))
        }
        None => (raw, None),
    };
    Ok((role.parse()?, stamp))
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["functions"] => Ok(Command::Functions),
        ["list", function] => Ok(Command::List {
            function: function.to_string(),
            role: ArtifactRole::Output,
        }),
        ["list", function, flag] => {
            let role = match *flag {
                "--exceptions" => ArtifactRole::Exception,
                "--inputs" => ArtifactRole::Input,
                other => return Err(format!("unknown flag {other}")),
            };
            Ok(Command::List {
                function: function.to_string(),
                role,
            })
        }
        ["history", function, key, role] => {
            let (role, stamp) = parse_role(role)?;
            if stamp.is_some() {
                return Err("history takes a role without a stamp".to_string());
            }
            Ok(Command::History {
                function: function.to_string(),
                key: parse_key(key)?,
                role,
            })
        }
        ["show", function, key, role] => {
            let (role, stamp) = parse_role(role)?;
            Ok(Command::Show {
                function: function.to_string(),
                key: parse_key(key)?,
                role,
                stamp,
            })
        }
        ["invalidate", function] => Ok(Command::Invalidate {
            function: function.to_string(),
            key: None,
        }),
        ["invalidate", function, key] => Ok(Command::Invalidate {
            function: function.to_string(),
            key: Some(parse_key(key)?),
        }),
        [] => Err("missing command".to_string()),
        [command, ..] => Err(format!("unrecognized arguments for {command}")),
    }
}

fn main() -> ExitCode {
    let format = std::env::var("MEMOIR_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LogFormat::Plain);
    if let Err(e) = init_tracing(format) {
        eprintln!("warning: {e}");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("-h" | "--help" | "help")) {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {e}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match CacheEngine::from_env().and_then(|engine| run(&engine, command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(engine: &CacheEngine, command: Command) -> MemoResult<()> {
    let storage = engine.storage();
    let config = engine.defaults();
    let function_at = |segment: &str| FunctionAddress::from_segment(config.prefix.as_deref(), segment);

    match command {
        Command::Functions => {
            for function in engine.functions(config.prefix.as_deref())? {
                println!("{function}");
            }
        }
        Command::List { function, role } => {
            for key in storage.list_keys(&function_at(&function), role)? {
                println!("{key}");
            }
        }
        Command::History {
            function,
            key,
            role,
        } => {
            let entry = function_at(&function).entry(key);
            print_history(storage, config, &entry, role)?;
        }
        Command::Show {
            function,
            key,
            role,
            stamp,
        } => {
            let entry = function_at(&function).entry(key);
            let address = match stamp {
                Some(stamp) => entry.archived(role, stamp),
                None => entry.current(role),
            };
            show(storage, &address)?;
        }
        Command::Invalidate { function, key } => {
            let function = function_at(&function);
            let removed = match key {
                Some(key) => storage.delete_entry(&function.entry(key))?,
                None => storage.delete_function(&function)?,
            };
            println!("removed {removed} artifact(s)");
        }
    }
    Ok(())
}

fn print_history(
    storage: &StorageAdapter,
    config: &MemoConfig,
    entry: &EntryAddress,
    role: ArtifactRole,
) -> MemoResult<()> {
    let now = chrono::Utc::now();
    for address in storage.history(entry, role)? {
        let header = storage
            .read(&address)?
            .map(|bytes| Envelope::decode_metadata(&bytes));
        match header {
            Some(Ok(metadata)) => {
                let state = if !role.is_result() {
                    "-"
                } else if is_valid(&metadata, config, now) {
                    "valid"
                } else {
                    "expired"
                };
                println!(
                    "{}\t{}\t{}\t{}",
                    address,
                    metadata.written_at.to_rfc3339(),
                    metadata.codec,
                    state
                );
            }
            Some(Err(e)) => println!("{address}\tunreadable: {e}"),
            None => {}
        }
    }
    Ok(())
}

fn show(storage: &StorageAdapter, address: &ArtifactAddress) -> MemoResult<()> {
    let bytes = storage
        .read(address)?
        .ok_or_else(|| MemoError::from(memoir_core::StorageError::NotFound {
            path: address.path(),
        }))?;
    let envelope = Envelope::decode(&bytes)?;
    let header = serde_json::to_string_pretty(&envelope.metadata).map_err(|e| {
        memoir_core::SerializationError::Encode {
            codec: "json".to_string(),
            reason: e.to_string(),
        }
    })?;
    println!("{header}");
    println!();

    match CodecKind::from_id(&envelope.metadata.codec)? {
        CodecKind::Bincode => println!(
            "<{} bytes of bincode, not self-describing>",
            envelope.payload.len()
        ),
        codec => {
            let value: Value = codec.decode(&envelope.payload)?;
            let rendered = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
            println!("{rendered}");
        }
    }
    Ok(())
}
