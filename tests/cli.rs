use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_monkeycore"))
}

fn make_temp_dir() -> Result<PathBuf, String> {
    let base = std::env::temp_dir().join("monkeycore_cli_tests");
    fs::create_dir_all(&base).map_err(|e| e.to_string())?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?
        .as_millis();
    let dir = base.join(format!("run_{}", now));
    fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
    Ok(dir)
}

struct CommandResult {
    status_ok: bool,
    stdout: String,
    stderr: String,
}

fn run_cmd(args: &[&str], input: Option<&str>, cwd: Option<&Path>) -> Result<CommandResult, String> {
    let mut cmd = Command::new(bin_path());
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let input_data = input.map(|s| s.to_string());
    if input_data.is_some() {
        cmd.stdin(Stdio::piped());
    }

    let mut child = cmd.spawn().map_err(|e| e.to_string())?;

    if let Some(stdin) = input_data {
        if let Some(mut handle) = child.stdin.take() {
            handle
                .write_all(stdin.as_bytes())
                .map_err(|e| e.to_string())?;
        }
    }

    let output = child.wait_with_output().map_err(|e| e.to_string())?;
    Ok(CommandResult {
        status_ok: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

fn run_repl(input: &str) -> Result<CommandResult, String> {
    run_cmd(&["repl"], Some(input), None)
}

#[test]
fn version_flag() -> Result<(), String> {
    let result = run_cmd(&["--version"], None, None)?;
    if !result.status_ok {
        return Err(result.stderr);
    }
    if !result.stdout.contains("monkeycore") {
        return Err(format!("unexpected version output: {}", result.stdout));
    }
    Ok(())
}

#[test]
fn unknown_option_fails() -> Result<(), String> {
    let result = run_cmd(&["--bogus"], None, None)?;
    if result.status_ok {
        return Err("expected failure for unknown option".into());
    }
    if !result.stderr.contains("Unknown option") {
        return Err(format!("unexpected stderr: {}", result.stderr));
    }
    Ok(())
}

#[test]
fn run_file_with_parse_errors_fails() -> Result<(), String> {
    let dir = make_temp_dir()?;
    let file = dir.join("bad.mk");
    fs::write(&file, "let = 5;\n").map_err(|e| e.to_string())?;

    let result = run_cmd(&[file.to_str().ok_or("bad path")?], None, None)?;
    if result.status_ok {
        return Err("expected parse failure".into());
    }
    if !result.stderr.contains("expected next token to be IDENT") {
        return Err(format!("unexpected stderr: {}", result.stderr));
    }
    Ok(())
}

#[test]
fn emit_and_run_bytecode() -> Result<(), String> {
    let dir = make_temp_dir()?;
    let file = dir.join("demo.mk");
    fs::write(&file, "puts(1 + 2)\n").map_err(|e| e.to_string())?;

    let emit = run_cmd(&["--emit", file.to_str().ok_or("bad path")?], None, None)?;
    if !emit.status_ok {
        return Err(emit.stderr);
    }

    let bc = dir.join("demo.mkbc");
    if !bc.exists() {
        return Err("expected bytecode file".into());
    }

    let result = run_cmd(&["run", bc.to_str().ok_or("bad path")?], None, None)?;
    if !result.status_ok {
        return Err(result.stderr);
    }
    if result.stdout.trim() != "3" {
        return Err(format!("unexpected output: {}", result.stdout));
    }
    Ok(())
}

#[test]
fn run_rejects_corrupt_bytecode() -> Result<(), String> {
    let dir = make_temp_dir()?;
    let file = dir.join("junk.mkbc");
    fs::write(&file, b"not bytecode").map_err(|e| e.to_string())?;

    let result = run_cmd(&["run", file.to_str().ok_or("bad path")?], None, None)?;
    if result.status_ok {
        return Err("expected failure for corrupt bytecode".into());
    }
    if !result.stderr.contains("bad magic") {
        return Err(format!("unexpected stderr: {}", result.stderr));
    }
    Ok(())
}

#[test]
fn repl_evaluates_expressions() -> Result<(), String> {
    let result = run_repl("1 + 2 * 3\n:exit\n")?;
    if !result.status_ok {
        return Err(result.stderr);
    }
    if !result.stdout.contains("7") {
        return Err(format!("unexpected repl output: {}", result.stdout));
    }
    Ok(())
}

#[test]
fn repl_state_persists_across_lines() -> Result<(), String> {
    let input = "let a = 5;\nlet b = a;\nlet c = a + b + 5;\nc\n:exit\n";
    let result = run_repl(input)?;
    if !result.status_ok {
        return Err(result.stderr);
    }
    if !result.stdout.contains("15") {
        return Err(format!("unexpected repl output: {}", result.stdout));
    }
    Ok(())
}

#[test]
fn repl_prints_parser_error_banner() -> Result<(), String> {
    let result = run_repl("let = 5\n:exit\n")?;
    if !result.status_ok {
        return Err(result.stderr);
    }
    if !result.stdout.contains("monkey business") || !result.stdout.contains("parser errors:") {
        return Err(format!("unexpected repl output: {}", result.stdout));
    }
    Ok(())
}

#[test]
fn repl_reports_compile_errors() -> Result<(), String> {
    let result = run_repl("foobar\n:exit\n")?;
    if !result.status_ok {
        return Err(result.stderr);
    }
    if !result.stdout.contains("Compilation failed")
        || !result.stdout.contains("undefined variable foobar")
    {
        return Err(format!("unexpected repl output: {}", result.stdout));
    }
    Ok(())
}

#[test]
fn repl_reports_runtime_errors_and_continues() -> Result<(), String> {
    let input = "let a = 10;\n5 + true\na\n:exit\n";
    let result = run_repl(input)?;
    if !result.status_ok {
        return Err(result.stderr);
    }
    if !result.stdout.contains("Executing bytecode failed")
        || !result
            .stdout
            .contains("unsupported types for binary operation: INTEGER BOOLEAN")
    {
        return Err(format!("unexpected repl output: {}", result.stdout));
    }
    // Globals survive a failed run.
    if !result.stdout.contains("10") {
        return Err(format!("expected binding to survive: {}", result.stdout));
    }
    Ok(())
}

#[test]
fn repl_exits_on_eof() -> Result<(), String> {
    let result = run_repl("1 + 1\n")?;
    if !result.status_ok {
        return Err(result.stderr);
    }
    if !result.stdout.contains("2") {
        return Err(format!("unexpected repl output: {}", result.stdout));
    }
    Ok(())
}
