pub const SOURCE_MOUNT: &str = "/source";
pub const SNAPSHOT_MOUNT: &str = "/snapshot";

/// rsync exit code for "some files vanished before they could be transferred".
pub const RSYNC_VANISHED: i32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsyncMode {
    /// Report differences without writing anything.
    DryRun,
    /// Make the snapshot an exact copy, deleting what no longer exists live.
    Mirror,
}

pub fn rsync_args(excludes: &[String], mode: RsyncMode) -> Vec<String> {
    let mut args = vec!["rsync".to_string(), "-a".to_string()];
    if mode == RsyncMode::DryRun {
        args.push("--dry-run".to_string());
        args.push("--itemize-changes".to_string());
    }
    args.push("--delete".to_string());
    for exclude in excludes {
        args.push(format!("--exclude={}", exclude));
    }
    args.push(format!("{}/", SOURCE_MOUNT));
    args.push(format!("{}/", SNAPSHOT_MOUNT));
    args
}

pub fn rsync_ok(code: i32) -> bool {
    code == 0 || code == RSYNC_VANISHED
}

/// Paths reported as different by `--itemize-changes`. Directory lines that only
/// carry attribute updates (`.d..t......`) are ignored: churn inside excluded
/// directories bumps their mtime without changing anything worth backing up.
pub fn parse_itemized(output: &str) -> Vec<String> {
    let mut changed = Vec::new();
    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(path) = line.strip_prefix("*deleting") {
            changed.push(path.trim().to_string());
            continue;
        }
        let Some((flags, path)) = line.split_once(' ') else {
            continue;
        };
        if flags.len() < 2 {
            continue;
        }
        let mut chars = flags.chars();
        let update = chars.next().unwrap_or('.');
        let kind = chars.next().unwrap_or('?');
        if !matches!(update, '<' | '>' | 'c' | 'h' | '.') {
            continue;
        }
        if update == '.' && kind == 'd' {
            continue;
        }
        changed.push(path.trim().to_string());
    }
    changed
}
