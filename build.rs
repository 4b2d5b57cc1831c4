use std::process::Command;

fn main() {
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_timestamp());
    let git_sha = run(
        "git",
        &["rev-parse", "--short", "HEAD"],
    )
    .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=BUILD_GIT_SHA={git_sha}");

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
}

/// UTC ISO-8601. `SOURCE_DATE_EPOCH` wins for reproducible builds.
fn build_timestamp() -> String {
    const FORMAT: &str = "+%Y-%m-%dT%H:%M:%SZ";
    if let Ok(epoch) = std::env::var("SOURCE_DATE_EPOCH") {
        let at = format!("@{}", epoch.trim());
        if let Some(ts) = run("date", &["-u", "-d", &at, FORMAT]) {
            return ts;
        }
    }
    run("date", &["-u", FORMAT]).unwrap_or_else(|| "unknown".into())
}

fn run(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
