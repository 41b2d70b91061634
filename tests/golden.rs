use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_monkeycore"))
}

fn run_script(bin: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new(bin)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| e.to_string())?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).to_string());
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn read_text(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| e.to_string())
}

fn normalize(s: &str) -> String {
    s.replace("\r\n", "\n").trim_end().to_string()
}

fn make_temp_dir() -> Result<PathBuf, String> {
    let base = std::env::temp_dir().join("monkeycore_tests");
    fs::create_dir_all(&base).map_err(|e| e.to_string())?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?
        .as_millis();
    let dir = base.join(format!("run_{}", now));
    fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
    Ok(dir)
}

fn collect_scripts(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| e.to_string())? {
        let path = entry.map_err(|e| e.to_string())?.path();
        if path.extension().map(|e| e == "mk").unwrap_or(false) {
            out.push(path);
        }
    }
    Ok(out)
}

fn script_key(path: &Path) -> Result<String, String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| "invalid script name".to_string())
}

/// Every script must produce the same output when run from source and when
/// run again from its emitted bytecode file.
#[test]
fn golden_scripts_source_and_bytecode() -> Result<(), String> {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let scripts_dir = root.join("tests").join("scripts");
    let expected_dir = root.join("tests").join("expected");

    let bin = bin_path();
    let temp_dir = make_temp_dir()?;

    let mut entries = collect_scripts(&scripts_dir)?;
    entries.sort();
    if entries.is_empty() {
        return Err("no golden scripts found".into());
    }

    for script_path in entries {
        let key = script_key(&script_path)?;
        let expected_path = expected_dir.join(format!("{}.out", key));
        let expected = normalize(&read_text(&expected_path)?);

        let temp_script = temp_dir.join(format!("{}.mk", key));
        fs::write(&temp_script, read_text(&script_path)?).map_err(|e| e.to_string())?;

        let output_src = run_script(&bin, &[temp_script.to_str().ok_or("Invalid temp path")?])?;
        let output_src = normalize(&output_src);
        if output_src != expected {
            return Err(format!(
                "Source mismatch for {}: expected '{}' got '{}'",
                key, expected, output_src
            ));
        }

        run_script(
            &bin,
            &["--emit", temp_script.to_str().ok_or("Invalid temp path")?],
        )?;

        let temp_bc = temp_script.with_extension("mkbc");
        let output_bc = run_script(
            &bin,
            &["run", temp_bc.to_str().ok_or("Invalid temp path")?],
        )?;

        let output_bc = normalize(&output_bc);
        if output_bc != expected {
            return Err(format!(
                "Bytecode mismatch for {}: expected '{}' got '{}'",
                key, expected, output_bc
            ));
        }
    }

    Ok(())
}
