//! The `tiny` script runner.
//!
//! Compiles one script file, binds a minimal set of host functions
//! (`print(...)`), and runs it to completion.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tiny::{State, Thread, Value};

fn main() -> Result<()> {
    let mut args = std::env::args_os().skip(1);

    let path = match args.next() {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("usage: tiny <script>");
            std::process::exit(2);
        }
    };

    if args.next().is_some() {
        bail!("expected exactly one script path");
    }

    let source = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut state = State::new();

    state
        .bind_function("print(...)", print_values)
        .context("failed to bind print")?;

    let module = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("script");

    state
        .compile_string(module, &source)
        .with_context(|| format!("failed to compile {}", path.display()))?;

    let mut thread = state.spawn_thread();
    thread.start();

    if let Err(err) = thread.run() {
        let detail = thread.error().unwrap_or_default().to_string();
        bail!("runtime error: {detail} ({err})");
    }

    Ok(())
}

/// `print(...)`: write the arguments separated by spaces, then a newline.
fn print_values(thread: &mut Thread<'_>, args: &[Value]) -> Result<Value, tiny::VmError> {
    let mut line = String::new();

    for (i, &arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }

        match arg {
            Value::Null => line.push_str("null"),
            Value::Bool(b) => line.push_str(if b { "true" } else { "false" }),
            Value::Char(c) => line.push(c),
            Value::Int(i) => line.push_str(&i.to_string()),
            Value::Float(f) => line.push_str(&f.to_string()),
            Value::Str(_) => {
                line.push_str(thread.string_value(arg).unwrap_or_default().as_str())
            }
            Value::LightNative(_) | Value::Native(_) => line.push_str("<native>"),
            Value::Struct(_) => line.push_str("<struct>"),
        }
    }

    println!("{line}");
    Ok(Value::Null)
}
