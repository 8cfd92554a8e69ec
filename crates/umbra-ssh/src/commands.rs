//! The canned command table the fake shell consults once a line of input
//! is terminated. Responses are ported verbatim from the reference
//! honeypot so the literal bytes an attacker sees stay stable across runs.

const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n\
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
bin:x:2:2:bin:/bin:/usr/sbin/nologin\n\
sys:x:3:3:sys:/dev:/usr/sbin/nologin\n\
www-data:x:33:33:www-data:/var/www:/usr/sbin/nologin";

const LS_LA: &str = "total 32\n\
drwx------  5 root root 4096 Dec  2 14:23 .\n\
drwxr-xr-x 20 root root 4096 Nov 15 10:00 ..\n\
-rw-------  1 root root  220 Nov 15 10:00 .bash_logout\n\
-rw-------  1 root root 3771 Nov 15 10:00 .bashrc\n\
drwx------  2 root root 4096 Nov 15 10:00 .ssh";

const W: &str = " 14:32:45 up 127 days, 1 user, load average: 0.00\n\
USER     TTY      FROM             LOGIN@   IDLE\n\
root     pts/0    192.168.1.100    14:32    0.00s";

const UPTIME: &str = " 14:32:45 up 127 days, 3:42, 1 user, load average: 0.00, 0.01, 0.05";

const UNAME_A: &str = "Linux honeypot 5.4.0-89-generic #100-Ubuntu SMP Fri Sep 24 14:50:10 UTC 2021 x86_64 GNU/Linux";

/// Shell builtins that legitimately produce no output for an unknown path.
const BUILTINS: &[&str] = &["cd", "export", "source", "."];

/// Exact-match command table, checked before the base-word fallback.
fn exact_match(cmd: &str) -> Option<&'static str> {
    match cmd {
        "whoami" => Some("root"),
        "id" => Some("uid=0(root) gid=0(root) groups=0(root)"),
        "pwd" => Some("/root"),
        "uname" => Some("Linux"),
        "uname -a" => Some(UNAME_A),
        "hostname" => Some("honeypot"),
        "uptime" => Some(UPTIME),
        "cat /etc/passwd" => Some(PASSWD),
        "ls" => Some("Desktop  Documents  Downloads  Music  Pictures"),
        "ls -la" => Some(LS_LA),
        "w" => Some(W),
        _ => None,
    }
}

/// Base-word table, checked when no exact match applies.
fn base_match(base: &str) -> Option<&'static str> {
    match base {
        "whoami" => Some("root"),
        "id" => Some("uid=0(root) gid=0(root) groups=0(root)"),
        "pwd" => Some("/root"),
        "uname" => Some("Linux"),
        "hostname" => Some("honeypot"),
        "uptime" => Some(UPTIME),
        "ls" => Some("Desktop  Documents  Downloads  Music  Pictures"),
        "w" => Some(W),
        _ => None,
    }
}

/// Produces the response text for one completed command line. `exit` and
/// `logout` are handled by the caller before this is reached.
pub fn respond(command: &str) -> String {
    let cmd_lower = command.to_lowercase();
    let cmd_lower = cmd_lower.trim();
    let base = cmd_lower.split_whitespace().next().unwrap_or("");

    if let Some(resp) = exact_match(cmd_lower) {
        return resp.to_string();
    }
    if let Some(resp) = base_match(base) {
        return resp.to_string();
    }
    if !base.is_empty() && !BUILTINS.contains(&base) {
        return format!("-bash: {base}: command not found");
    }
    String::new()
}

/// Whether `command` ends the session.
pub fn is_exit(command: &str) -> bool {
    matches!(command.to_lowercase().trim(), "exit" | "logout")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_exact_commands_match_canonical_output() {
        assert_eq!(respond("whoami"), "root");
        assert_eq!(respond("id"), "uid=0(root) gid=0(root) groups=0(root)");
        assert_eq!(respond("pwd"), "/root");
        assert_eq!(respond("hostname"), "honeypot");
        assert_eq!(respond("uname -a"), UNAME_A);
        assert!(respond("cat /etc/passwd").contains("root:x:0:0:root:/root:/bin/bash"));
    }

    #[test]
    fn base_word_fallback_applies_to_flagged_variants() {
        assert_eq!(respond("ls -l /tmp"), "Desktop  Documents  Downloads  Music  Pictures");
        assert_eq!(respond("whoami --help"), "root");
        assert_eq!(respond("uname -r"), "Linux");
    }

    #[test]
    fn unknown_command_reports_not_found() {
        assert_eq!(respond("nmap -sV 10.0.0.1"), "-bash: nmap: command not found");
    }

    #[test]
    fn shell_builtins_are_silent() {
        assert_eq!(respond("cd /tmp"), "");
        assert_eq!(respond("export FOO=bar"), "");
        assert_eq!(respond(""), "");
    }

    #[test]
    fn exit_and_logout_are_recognized_case_insensitively() {
        assert!(is_exit("exit"));
        assert!(is_exit("LOGOUT"));
        assert!(!is_exit("ls"));
    }
}
