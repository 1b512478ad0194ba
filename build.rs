use std::path::{Path, PathBuf};
use std::process::Command;

const MAX_LINES: usize = 750;

const CHECKED_EXTENSIONS: &[&str] = &["rs", "yaml", "toml"];

const EXCLUDED_DIRS: &[&str] = &["target", ".git", "examples"];

const EXCLUDED_FILES: &[&str] = &["Cargo.lock"];

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/main");

    let sha = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout)
                    .ok()
                    .map(|s| s.trim().to_string())
            } else {
                None
            }
        })
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=CHAT_SESSION_GIT_SHA={}", sha);

    let root = PathBuf::from(
        std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR must be set"),
    );
    let files = collect_files_to_check(&root);
    for file in &files {
        println!("cargo:rerun-if-changed={}", file.display());
    }

    enforce_line_limits(&root, &files);
    let sources: Vec<SourceFile> = files
        .iter()
        .filter(|p| {
            p.extension().and_then(|e| e.to_str()) == Some("rs")
                && p.file_name().and_then(|n| n.to_str()) != Some("build.rs")
        })
        .filter_map(|p| {
            let content = std::fs::read_to_string(p).ok()?;
            let rel = p.strip_prefix(&root).unwrap_or(p).to_path_buf();
            Some(SourceFile { rel, content })
        })
        .collect();

    enforce_no_dead_code_allows(&sources);
    enforce_serial_for_env_mutations(&sources);
}

struct SourceFile {
    rel: PathBuf,
    content: String,
}

fn report(title: &str, violations: &[(PathBuf, usize, String)], advice: &[&str]) {
    eprintln!("\n========================================");
    eprintln!("{}", title);
    eprintln!("========================================");
    for (path, line, detail) in violations {
        eprintln!("  {}:{}", path.display(), line);
        eprintln!("    {}", detail.trim());
    }
    eprintln!("========================================");
    for line in advice {
        eprintln!("{}", line);
    }
    eprintln!("========================================\n");
}

fn enforce_line_limits(root: &Path, files: &[PathBuf]) {
    let mut violations = Vec::new();
    for file in files {
        let rel_path = file.strip_prefix(root).unwrap_or(file).to_path_buf();
        match std::fs::read_to_string(file) {
            Ok(content) => {
                let lines = count_non_empty_lines(&content);
                if lines > MAX_LINES {
                    violations.push((
                        rel_path,
                        lines,
                        format!("{} lines (exceeds by {})", lines, lines - MAX_LINES),
                    ));
                }
            }
            Err(e) => println!(
                "cargo:warning=Could not read file {}: {}",
                rel_path.display(),
                e
            ),
        }
    }

    if !violations.is_empty() {
        report(
            &format!("FILE LINE LIMIT EXCEEDED (max {} lines)", MAX_LINES),
            &violations,
            &["Please split these files into smaller modules."],
        );
        panic!(
            "Build failed: {} file(s) exceed the {} line limit",
            violations.len(),
            MAX_LINES
        );
    }
}

fn collect_files_to_check(root: &Path) -> Vec<PathBuf> {
    if let Ok(output) = Command::new("git")
        .args(["ls-files"])
        .current_dir(root)
        .output()
    {
        if output.status.success() {
            if let Ok(stdout) = String::from_utf8(output.stdout) {
                return stdout
                    .lines()
                    .map(|line| root.join(line))
                    .filter(|path| should_check_file(path, root))
                    .collect();
            }
        }
    }

    let mut files = Vec::new();
    walk_directory(root, root, &mut files);
    files
}

fn walk_directory(dir: &Path, root: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let excluded = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| EXCLUDED_DIRS.contains(&name));
            if !excluded {
                walk_directory(&path, root, files);
            }
        } else if should_check_file(&path, root) {
            files.push(path);
        }
    }
}

fn should_check_file(path: &Path, root: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if !CHECKED_EXTENSIONS.contains(&ext) {
        return false;
    }

    if let Ok(rel_path) = path.strip_prefix(root) {
        if EXCLUDED_FILES.contains(&rel_path.to_string_lossy().as_ref()) {
            return false;
        }
        let in_excluded_dir = rel_path.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
        });
        if in_excluded_dir {
            return false;
        }
    }

    true
}

fn count_non_empty_lines(content: &str) -> usize {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .count()
}

fn enforce_no_dead_code_allows(sources: &[SourceFile]) {
    let mut violations = Vec::new();
    for source in sources {
        for (line_num, line) in source.content.lines().enumerate() {
            let trimmed = line.trim();
            if (trimmed.starts_with("#[allow(") || trimmed.starts_with("#![allow("))
                && trimmed.contains("dead_code")
            {
                violations.push((source.rel.clone(), line_num + 1, line.to_string()));
            }
        }
    }

    if !violations.is_empty() {
        report(
            "#[allow(dead_code)] IS NOT ALLOWED",
            &violations,
            &[
                "Delete unused code instead of silencing the warning.",
                "Code only needed by tests belongs behind #[cfg(test)].",
            ],
        );
        panic!(
            "Build failed: {} #[allow(dead_code)] occurrence(s) found. Remove the dead code.",
            violations.len()
        );
    }
}

/// Requires #[serial] for tests that mutate environment variables.
///
/// Environment variables are process-global; tests touching them without
/// #[serial] fail intermittently when run in parallel.
fn enforce_serial_for_env_mutations(sources: &[SourceFile]) {
    let mut violations = Vec::new();

    for source in sources {
        let lines: Vec<&str> = source.content.lines().collect();
        let mut in_test_fn = false;
        let mut test_fn_start = 0;
        let mut test_fn_name = String::new();
        let mut has_serial = false;
        let mut brace_depth = 0i32;

        for (i, line) in lines.iter().enumerate() {
            let trimmed = line.trim();

            if trimmed == "#[serial]" || trimmed == "#[serial_test::serial]" {
                has_serial = true;
            }

            if trimmed == "#[test]" || trimmed.starts_with("#[tokio::test") {
                if let Some(fn_line) = lines.iter().skip(i + 1).take(4).find(|l| l.contains("fn "))
                {
                    test_fn_start = i + 1;
                    test_fn_name = fn_line
                        .split("fn ")
                        .nth(1)
                        .and_then(|rest| rest.split('(').next())
                        .unwrap_or_default()
                        .trim()
                        .to_string();
                    in_test_fn = true;
                    brace_depth = 0;
                }
            }

            if !in_test_fn {
                continue;
            }

            for c in line.chars() {
                match c {
                    '{' => brace_depth += 1,
                    '}' => {
                        brace_depth -= 1;
                        if brace_depth == 0 {
                            in_test_fn = false;
                            has_serial = false;
                        }
                    }
                    _ => {}
                }
            }

            let mutates_env = !trimmed.starts_with("//")
                && (trimmed.contains("env::set_var") || trimmed.contains("env::remove_var"));
            if mutates_env && !has_serial {
                violations.push((
                    source.rel.clone(),
                    test_fn_start,
                    format!("test `{}` mutates env without #[serial]", test_fn_name),
                ));
                in_test_fn = false;
            }
        }
    }

    if !violations.is_empty() {
        report(
            "ENV MUTATIONS REQUIRE #[serial]",
            &violations,
            &["Add #[serial] from the serial_test crate to these tests."],
        );
        panic!(
            "Build failed: {} test(s) mutate env vars without #[serial].",
            violations.len()
        );
    }
}
