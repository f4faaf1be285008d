use regex::Regex;
use serde::{Deserialize, Serialize};

/// Category of high-impact operation a denylisted token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveKind {
    Deletion,
    PrivilegeEscalation,
    DiskFormat,
    DeviceWrite,
    PermissionChange,
    PowerState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveMatch {
    pub token: String,
    pub kind: SensitiveKind,
}

#[derive(thiserror::Error, Debug)]
pub enum PolicyError {
    #[error("invalid denylist pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

struct DenyRule {
    label: &'static str,
    kind: SensitiveKind,
    pattern: &'static str,
}

// Tokens are matched on word boundaries so `ls ./format` or `firmware` do not
// trip the gate, while `sudo rm` or `x && rm -rf y` do. `rm` and `dd` also
// match when invoked through an absolute path such as `/usr/bin/rm`, but not
// as a file name like `./rm.txt`.
const DEFAULT_RULES: &[DenyRule] = &[
    DenyRule {
        label: "rm",
        kind: SensitiveKind::Deletion,
        pattern: r#"(^|[^\w./-])((/[\w.-]+)*/)?rm($|[\s;&|<>)`'"])"#,
    },
    DenyRule {
        label: "sudo",
        kind: SensitiveKind::PrivilegeEscalation,
        pattern: r"\bsudo\b",
    },
    DenyRule {
        label: "dd",
        kind: SensitiveKind::DeviceWrite,
        pattern: r#"(^|[^\w./-])((/[\w.-]+)*/)?dd($|[\s;&|<>)`'"])"#,
    },
    DenyRule {
        label: "mkfs",
        kind: SensitiveKind::DiskFormat,
        pattern: r"\bmkfs(\.\w+)?\b",
    },
    DenyRule {
        label: "> /dev",
        kind: SensitiveKind::DeviceWrite,
        pattern: r">\s*/dev/(sd|hd|vd|xvd|nvme|mmcblk|disk|md|mapper|loop)",
    },
    DenyRule {
        label: "chmod",
        kind: SensitiveKind::PermissionChange,
        pattern: r"\bchmod\b",
    },
    DenyRule {
        label: "chown",
        kind: SensitiveKind::PermissionChange,
        pattern: r"\bchown\b",
    },
    DenyRule {
        label: "reboot",
        kind: SensitiveKind::PowerState,
        pattern: r"\breboot\b",
    },
    DenyRule {
        label: "shutdown",
        kind: SensitiveKind::PowerState,
        pattern: r"\bshutdown\b",
    },
    DenyRule {
        label: "poweroff",
        kind: SensitiveKind::PowerState,
        pattern: r"\bpoweroff\b",
    },
    DenyRule {
        label: "halt",
        kind: SensitiveKind::PowerState,
        pattern: r"\bhalt\b",
    },
];

/// Labels of every denylisted token, in evaluation order.
pub fn denylist_tokens() -> Vec<&'static str> {
    DEFAULT_RULES.iter().map(|rule| rule.label).collect()
}

#[derive(Debug, Clone)]
struct CompiledRule {
    label: &'static str,
    kind: SensitiveKind,
    regex: Regex,
}

/// Classifies shell commands against a fixed denylist of high-impact tokens.
#[derive(Debug, Clone)]
pub struct SensitivityPolicy {
    rules: Vec<CompiledRule>,
}

impl SensitivityPolicy {
    pub fn new() -> Result<Self, PolicyError> {
        let rules = DEFAULT_RULES
            .iter()
            .map(|rule| {
                Regex::new(rule.pattern)
                    .map(|regex| CompiledRule {
                        label: rule.label,
                        kind: rule.kind,
                        regex,
                    })
                    .map_err(|source| PolicyError::InvalidPattern {
                        pattern: rule.pattern.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// First denylisted token found in `cmd`, if any.
    pub fn classify(&self, cmd: &str) -> Option<SensitiveMatch> {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(cmd))
            .map(|rule| SensitiveMatch {
                token: rule.label.to_string(),
                kind: rule.kind,
            })
    }

    pub fn is_sensitive(&self, cmd: &str) -> bool {
        self.classify(cmd).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> SensitivityPolicy {
        SensitivityPolicy::new().expect("default rules compile")
    }

    #[test]
    fn flags_each_category() {
        let policy = policy();
        let cases = [
            ("rm -rf /tmp/x", SensitiveKind::Deletion),
            ("sudo apt update", SensitiveKind::PrivilegeEscalation),
            ("dd if=/dev/zero of=disk.img", SensitiveKind::DeviceWrite),
            ("mkfs.ext4 /dev/sdb1", SensitiveKind::DiskFormat),
            ("echo hi > /dev/sda", SensitiveKind::DeviceWrite),
            ("chmod 777 script.sh", SensitiveKind::PermissionChange),
            ("chown root file", SensitiveKind::PermissionChange),
            ("reboot", SensitiveKind::PowerState),
            ("shutdown -h now", SensitiveKind::PowerState),
            ("/bin/rm -rf /tmp/x", SensitiveKind::Deletion),
            ("/usr/bin/rm -rf ~", SensitiveKind::Deletion),
            ("/bin/dd if=/dev/zero of=/dev/sda", SensitiveKind::DeviceWrite),
        ];
        for (cmd, kind) in cases {
            let found = policy.classify(cmd).unwrap_or_else(|| panic!("{cmd} not flagged"));
            assert_eq!(found.kind, kind, "{cmd}");
        }
    }

    #[test]
    fn chained_and_piped_deletions_are_flagged() {
        let policy = policy();
        assert!(policy.is_sensitive("cd /tmp && rm -rf build"));
        assert!(policy.is_sensitive("find . -name '*.o' | xargs rm"));
        assert!(policy.is_sensitive("ls;rm x"));
        assert!(policy.is_sensitive("cd /tmp && /bin/rm -rf build"));
        assert!(policy.is_sensitive("find . | xargs /usr/bin/rm"));
    }

    #[test]
    fn ordinary_commands_pass() {
        let policy = policy();
        for cmd in [
            "ls -la",
            "cat file.txt",
            "grep -rn format src/",
            "cp ./rm.txt backup/",
            "echo firmware",
            "git status",
            "ls | wc -l",
            "find / -name core 2> /dev/null",
            "cat ./rm.txt",
            "ls /tmp/rm.log",
            "cat /srv/dd.conf",
        ] {
            assert!(!policy.is_sensitive(cmd), "{cmd} flagged unexpectedly");
        }
    }

    proptest! {
        #[test]
        fn any_command_containing_a_denylisted_word_is_flagged(
            prefix in "[a-z]{1,6}",
            dir in prop::sample::select(vec!["", "/bin/", "/usr/bin/", "/usr/local/bin/"]),
            token in prop::sample::select(vec!["rm", "sudo", "dd", "mkfs", "chmod", "chown", "reboot", "shutdown"]),
            suffix in "[a-z/]{0,6}",
        ) {
            let cmd = format!("{prefix} {dir}{token} {suffix}");
            prop_assert!(policy().is_sensitive(&cmd));
        }

        #[test]
        fn plain_lowercase_words_without_denylisted_tokens_pass(
            words in prop::collection::vec("[a-z]{1,8}", 1..5)
        ) {
            let denied = denylist_tokens();
            prop_assume!(words.iter().all(|w| !denied.iter().any(|d| w == d) && !w.starts_with("mkfs")));
            let cmd = words.join(" ");
            prop_assert!(!policy().is_sensitive(&cmd));
        }
    }
}
