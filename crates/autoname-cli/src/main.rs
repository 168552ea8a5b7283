use std::{env, fs, process::ExitCode, time::Instant};

use autoname::{Code, NoopTracer, ResolveConfig, StderrTracer, Tracer, Value, Vm, assemble};
use serde_json::json;

const USAGE: &str = "usage: autoname <program.asm> [--dis] [--trace] [--json] [--config <file.json>]";

/// Command line switches.
#[derive(Debug, Default)]
struct Options {
    path: Option<String>,
    disassemble: bool,
    trace: bool,
    json: bool,
    config: Option<String>,
}

fn main() -> ExitCode {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("error: {err}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    let Some(path) = options.path.as_deref() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let source = match read_file(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let config = match options.config.as_deref().map(load_config).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let code = match assemble(&source) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    if options.disassemble {
        println!("{code}");
    }

    if options.trace {
        run(Vm::with_config(config, StderrTracer::new()), code, options.json)
    } else {
        run(Vm::with_config(config, NoopTracer), code, options.json)
    }
}

fn run<Tr: Tracer>(mut vm: Vm<Tr>, code: Code, json: bool) -> ExitCode {
    let start = Instant::now();
    if let Err(err) = vm.run_module(code) {
        let elapsed = start.elapsed();
        eprintln!("error after: {elapsed:?}\n{err}");
        return ExitCode::FAILURE;
    }

    // Module-level globals holding self-naming values, in binding order.
    let bound: Vec<_> = vm
        .globals()
        .borrow()
        .iter()
        .filter_map(|(global, value)| match value {
            Value::Object(object) => Some((global.clone(), object.clone())),
            _ => None,
        })
        .collect();

    let mut failed = false;
    let mut report = Vec::with_capacity(bound.len());
    for (global, object) in bound {
        let name = vm.resolve_name(&object);
        let via = object.via().map(<&'static str>::from);
        let owner = object.owner();
        if json {
            report.push(match &name {
                Ok(name) => json!({ "global": global, "name": name, "via": via, "owner": owner }),
                Err(err) => json!({ "global": global, "error": err.to_string() }),
            });
            failed |= name.is_err();
            continue;
        }
        match name {
            Ok(name) => {
                let via = via.unwrap_or("none");
                match owner {
                    Some(owner) => println!("{global} = {name} (via {via}, owner {owner})"),
                    None => println!("{global} = {name} (via {via})"),
                }
            }
            Err(err) => {
                eprintln!("{global}: {err}");
                failed = true;
            }
        }
    }
    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    let elapsed = start.elapsed();
    eprintln!("done after: {elapsed:?}");
    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dis" => options.disassemble = true,
            "--trace" => options.trace = true,
            "--json" => options.json = true,
            "--config" => {
                let file = args.next().ok_or("--config needs a file")?;
                options.config = Some(file);
            }
            flag if flag.starts_with("--") => return Err(format!("unknown option {flag}")),
            _ if options.path.is_none() => options.path = Some(arg),
            _ => return Err(format!("unexpected argument {arg}")),
        }
    }
    Ok(options)
}

fn load_config(path: &str) -> Result<ResolveConfig, String> {
    let text = read_file(path)?;
    ResolveConfig::from_json(&text).map_err(|err| format!("{path}: {err}"))
}

fn read_file(file_path: &str) -> Result<String, String> {
    let metadata = fs::metadata(file_path).map_err(|err| format!("cannot read {file_path}: {err}"))?;
    if !metadata.is_file() {
        return Err(format!("{file_path} is not a file"));
    }
    fs::read_to_string(file_path).map_err(|err| format!("cannot read {file_path}: {err}"))
}
