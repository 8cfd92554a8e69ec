//! The fake filesystem the FTP emulator exposes: a fixed map from
//! directory path to directory entries, plus path resolution and canned
//! file content generation. Contents are ported verbatim from the
//! reference honeypot so the literal bytes an attacker sees (sizes,
//! credential strings, file names) stay stable across runs.

pub struct Entry {
    pub name: &'static str,
    pub entry_type: char,
    pub size: u64,
}

fn entries(pairs: &[(&'static str, char, u64)]) -> Vec<Entry> {
    pairs
        .iter()
        .map(|&(name, entry_type, size)| Entry { name, entry_type, size })
        .collect()
}

/// Looks up the fixed directory listing for `path`, or `None` if `path`
/// is not a directory in the fake filesystem.
pub fn listing_for(path: &str) -> Option<Vec<Entry>> {
    match path {
        "/" => Some(entries(&[
            (".", 'd', 4096),
            ("..", 'd', 4096),
            ("backup", 'd', 4096),
            ("public_html", 'd', 4096),
            ("logs", 'd', 4096),
            (".htaccess", '-', 235),
            ("config.php", '-', 1842),
        ])),
        "/backup" => Some(entries(&[
            (".", 'd', 4096),
            ("..", 'd', 4096),
            ("db_backup_2024.sql.gz", '-', 15_728_640),
            ("site_backup.tar.gz", '-', 52_428_800),
            ("credentials.txt", '-', 512),
        ])),
        "/public_html" => Some(entries(&[
            (".", 'd', 4096),
            ("..", 'd', 4096),
            ("index.php", '-', 4523),
            ("wp-config.php", '-', 2841),
            ("wp-content", 'd', 4096),
        ])),
        "/logs" => Some(entries(&[
            (".", 'd', 4096),
            ("..", 'd', 4096),
            ("access.log", '-', 1_048_576),
            ("error.log", '-', 524_288),
        ])),
        _ => None,
    }
}

/// Whether `path` names a directory in the fake filesystem.
pub fn is_known_directory(path: &str) -> bool {
    listing_for(path).is_some()
}

/// Looks up the size of a single file entry at `dir/filename`.
pub fn file_size(dir: &str, filename: &str) -> Option<u64> {
    listing_for(dir)?
        .into_iter()
        .find(|e| e.name == filename)
        .map(|e| e.size)
}

/// Resolves `path` against `current_dir`. Absolute paths start at `/`;
/// relative paths resolve against `current_dir`. `.` and `..` segments are
/// normalized. Idempotent: `resolve(resolve(p), d) == resolve(p, d)`.
pub fn resolve_path(current_dir: &str, path: &str) -> String {
    if path.is_empty() {
        return current_dir.to_string();
    }

    let combined = if path.starts_with('/') {
        path.to_string()
    } else if current_dir == "/" {
        format!("/{path}")
    } else {
        format!("{current_dir}/{path}")
    };

    let mut resolved: Vec<&str> = Vec::new();
    for part in combined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                resolved.pop();
            }
            p => resolved.push(p),
        }
    }

    if resolved.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", resolved.join("/"))
    }
}

/// Generates a Unix-style `ls -l` directory listing for `path`.
pub fn generate_listing(path: &str) -> Vec<String> {
    let Some(entries) = listing_for(path) else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|e| {
            let ftype = if e.entry_type == 'd' { 'd' } else { '-' };
            let perms = if e.entry_type == 'd' { "rwxr-xr-x" } else { "rw-r--r--" };
            format!("{ftype}{perms}   1 ftp      ftp  {:>10} Dec  5 12:00 {}", e.size, e.name)
        })
        .collect()
}

/// Generates canned content for `RETR`, dispatched on filename pattern.
pub fn fake_file_content(filename: &str) -> String {
    let lower = filename.to_lowercase();
    if lower.contains("passwd") || lower.contains("credentials") {
        "# Credentials backup\n\
         admin:admin123\n\
         root:toor\n\
         ftpuser:ftp@2024!\n\
         backup:b4ckup_p4ss\n"
            .to_string()
    } else if lower.contains("config") || lower.contains("wp-config") {
        "<?php\n\
         define('DB_NAME', 'wordpress');\n\
         define('DB_USER', 'wp_admin');\n\
         define('DB_PASSWORD', 'S3cr3t_DB_P4ss!');\n\
         define('DB_HOST', 'localhost');\n\
         ?>\n"
            .to_string()
    } else if lower.contains(".sql") {
        "-- MySQL dump\n\
         -- Database: wordpress\n\
         CREATE TABLE users (id INT, username VARCHAR(255));\n\
         INSERT INTO users VALUES (1, 'admin');\n"
            .to_string()
    } else if lower.contains(".htaccess") {
        "RewriteEngine On\nRewriteRule ^admin /login.php [L]\n".to_string()
    } else {
        format!("Content of {filename}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_absolute_path() {
        assert_eq!(resolve_path("/public_html", "/backup"), "/backup");
    }

    #[test]
    fn resolve_relative_path_from_root() {
        assert_eq!(resolve_path("/", "backup"), "/backup");
    }

    #[test]
    fn resolve_relative_path_from_subdirectory() {
        assert_eq!(resolve_path("/backup", "../public_html"), "/public_html");
    }

    #[test]
    fn resolve_dot_dot_past_root_stays_at_root() {
        assert_eq!(resolve_path("/", ".."), "/");
    }

    #[test]
    fn resolve_empty_path_is_current_dir() {
        assert_eq!(resolve_path("/backup", ""), "/backup");
    }

    #[test]
    fn resolve_is_idempotent() {
        let once = resolve_path("/backup", "../public_html/../backup");
        let twice = resolve_path(&once, &once);
        assert_eq!(once, "/backup");
        assert_eq!(once, twice);
    }

    #[test]
    fn credentials_file_contains_expected_substring() {
        let content = fake_file_content("credentials.txt");
        assert!(content.contains("admin:admin123"));
    }

    #[test]
    fn unknown_directory_has_no_listing() {
        assert!(listing_for("/nonexistent").is_none());
        assert!(!is_known_directory("/nonexistent"));
    }

    #[test]
    fn size_lookup_for_known_file() {
        assert_eq!(file_size("/backup", "credentials.txt"), Some(512));
        assert_eq!(file_size("/backup", "missing.txt"), None);
    }
}
