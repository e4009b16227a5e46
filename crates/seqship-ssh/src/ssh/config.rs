//! OpenSSH client configuration: parsing, policy checks and `ProxyJump`
//! expansion into a [`HopChain`].

use crate::ssh::types::*;
use glob::{MatchOptions, Pattern};
use seqship_core::TransferError;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

const MAX_INCLUDE_DEPTH: usize = 16;

const MATCH_OPTS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

// ── Parsed file ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct HostPattern {
    negated: bool,
    /// `None` matches every host.
    pattern: Option<Pattern>,
}

#[derive(Debug, Clone)]
struct HostBlock {
    patterns: Vec<HostPattern>,
    /// Lower-cased keyword with its arguments, in file order.
    options: Vec<(String, Vec<String>)>,
}

impl HostBlock {
    fn matches(&self, alias: &str) -> bool {
        let mut positive = false;
        for p in &self.patterns {
            let hit = p.pattern.as_ref().map_or(true, |pat| pat.matches_with(alias, MATCH_OPTS));
            if hit {
                if p.negated {
                    return false;
                }
                positive = true;
            }
        }
        positive
    }
}

/// A parsed `ssh_config(5)` file (plus anything it `Include`s).
#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    blocks: Vec<HostBlock>,
}

impl SshConfig {
    /// Read and parse `path`; a missing file is `ConfigNotFound`.
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            let err = if e.kind() == std::io::ErrorKind::NotFound {
                TransferError::config_not_found(format!("SSH config {} does not exist", path.display()))
            } else {
                TransferError::config_not_found(format!("SSH config {} is unreadable", path.display()))
            };
            err.with_source(e).log()
        })?;
        let mut config = Self::default();
        config.parse_into(&text, match_all(), 0)?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, TransferError> {
        let mut config = Self::default();
        config.parse_into(text, match_all(), 0)?;
        Ok(config)
    }

    fn parse_into(
        &mut self,
        text: &str,
        initial: Vec<HostPattern>,
        depth: usize,
    ) -> Result<(), TransferError> {
        let mut current = HostBlock { patterns: initial, options: Vec::new() };

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (keyword, args) = split_directive(line);
            if args.is_empty() {
                return Err(TransferError::configuration(format!(
                    "ssh config line {}: '{}' has no value",
                    lineno + 1,
                    keyword
                )));
            }

            match keyword.as_str() {
                "host" => {
                    self.blocks.push(std::mem::replace(
                        &mut current,
                        HostBlock { patterns: parse_patterns(&args)?, options: Vec::new() },
                    ));
                }
                "match" => {
                    tracing::warn!(line = lineno + 1, "ssh config Match blocks are not supported; skipping");
                    self.blocks.push(std::mem::replace(
                        &mut current,
                        HostBlock { patterns: Vec::new(), options: Vec::new() },
                    ));
                }
                "include" => {
                    if depth >= MAX_INCLUDE_DEPTH {
                        return Err(TransferError::configuration("ssh config Include nesting is too deep"));
                    }
                    let patterns = current.patterns.clone();
                    self.blocks.push(std::mem::replace(
                        &mut current,
                        HostBlock { patterns: patterns.clone(), options: Vec::new() },
                    ));
                    for file in include_targets(&args) {
                        let text = std::fs::read_to_string(&file).map_err(|e| {
                            TransferError::configuration(format!(
                                "cannot read included ssh config {}",
                                file.display()
                            ))
                            .with_source(e)
                        })?;
                        self.parse_into(&text, patterns.clone(), depth + 1)?;
                    }
                }
                _ => current.options.push((keyword, args)),
            }
        }
        self.blocks.push(current);
        Ok(())
    }

    /// Effective options for `alias`: first obtained value wins, except
    /// `IdentityFile`, which accumulates.
    pub fn lookup(&self, alias: &str) -> HostOptions {
        let mut opts = HostOptions::default();
        for block in self.blocks.iter().filter(|b| b.matches(alias)) {
            for (keyword, args) in &block.options {
                if keyword == "identityfile" {
                    opts.identity_files.extend(args.iter().cloned());
                } else {
                    opts.values.entry(keyword.clone()).or_insert_with(|| args.clone());
                }
            }
        }
        opts
    }
}

/// Option set for one alias, straight out of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostOptions {
    values: HashMap<String, Vec<String>>,
    identity_files: Vec<String>,
}

impl HostOptions {
    pub fn get(&self, keyword: &str) -> Option<&[String]> {
        self.values.get(&keyword.to_ascii_lowercase()).map(|v| v.as_slice())
    }

    pub fn first(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(|v| v.first()).map(|s| s.as_str())
    }

    pub fn identity_files(&self) -> &[String] {
        &self.identity_files
    }

    fn is_yes(&self, keyword: &str) -> bool {
        self.first(keyword).map(|v| v.eq_ignore_ascii_case("yes")).unwrap_or(false)
    }
}

fn match_all() -> Vec<HostPattern> {
    // Options before the first `Host` line apply to every host.
    vec![HostPattern { negated: false, pattern: None }]
}

fn parse_patterns(args: &[String]) -> Result<Vec<HostPattern>, TransferError> {
    args.iter()
        .map(|arg| {
            let (negated, body) = match arg.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, arg.as_str()),
            };
            Pattern::new(body)
                .map(|pattern| HostPattern { negated, pattern: Some(pattern) })
                .map_err(|e| {
                    TransferError::configuration(format!("invalid Host pattern '{arg}'")).with_source(e)
                })
        })
        .collect()
}

/// `Keyword value...` or `Keyword=value...`, with double-quoted arguments.
fn split_directive(line: &str) -> (String, Vec<String>) {
    let end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let keyword = line[..end].to_ascii_lowercase();
    let mut rest = line[end..].trim_start();
    if let Some(stripped) = rest.strip_prefix('=') {
        rest = stripped.trim_start();
    }

    let mut args = Vec::new();
    let mut buf = String::new();
    let mut quoted = false;
    for c in rest.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !buf.is_empty() {
                    args.push(std::mem::take(&mut buf));
                }
            }
            c => buf.push(c),
        }
    }
    if !buf.is_empty() {
        args.push(buf);
    }
    (keyword, args)
}

fn include_targets(args: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for arg in args {
        let expanded = expand_tilde(arg);
        let full = if expanded.is_absolute() {
            expanded
        } else {
            dirs::home_dir().unwrap_or_default().join(".ssh").join(expanded)
        };
        match glob::glob(&full.to_string_lossy()) {
            Ok(paths) => {
                let mut matched: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
                matched.sort();
                files.extend(matched);
            }
            Err(e) => tracing::warn!(pattern = %full.display(), error = %e, "ignoring bad Include pattern"),
        }
    }
    files
}

fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(raw));
    }
    match (raw.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(raw),
    }
}

/// `%h`, `%r`, `%d`, `%%` tokens followed by `~` expansion.
fn expand_path(raw: &str, hostname: &str, user: &str) -> PathBuf {
    let home = dirs::home_dir().map(|h| h.display().to_string()).unwrap_or_default();
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('h') => out.push_str(hostname),
            Some('r') => out.push_str(user),
            Some('d') => out.push_str(&home),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    expand_tilde(&out)
}

// ── Resolver ────────────────────────────────────────────────────────

/// Turns a target alias into a policy-checked [`HopChain`] without
/// touching the network.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    config: SshConfig,
    default_port: u16,
    auth_overrides: HashMap<String, AuthPreference>,
}

impl ConfigResolver {
    pub fn from_file(path: &Path) -> Result<Self, TransferError> {
        Ok(Self::from_config(SshConfig::load(path)?))
    }

    pub fn from_config(config: SshConfig) -> Self {
        Self { config, default_port: default_port(), auth_overrides: HashMap::new() }
    }

    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Hostname (or alias) → forced non-key strategy.
    pub fn with_auth_overrides(mut self, overrides: HashMap<String, AuthPreference>) -> Self {
        self.auth_overrides = overrides;
        self
    }

    pub fn resolve(&self, target: &str) -> Result<HopChain, TransferError> {
        let mut seen = HashSet::new();
        let mut hops = Vec::new();
        self.expand(target, &mut seen, &mut hops)?;

        if hops.last().map(|h| h.alias.as_str()) != Some(target) {
            return Err(TransferError::invalid_chain(format!(
                "hop chain for '{target}' does not end at the target"
            ))
            .log());
        }
        tracing::info!(target = %target, hops = ?hops.iter().map(|h| &h.alias).collect::<Vec<_>>(), "resolved hop chain");
        Ok(HopChain::new(hops))
    }

    fn expand(
        &self,
        alias: &str,
        seen: &mut HashSet<String>,
        hops: &mut Vec<HopSpec>,
    ) -> Result<(), TransferError> {
        if !seen.insert(alias.to_string()) {
            return Err(TransferError::proxy_jump_cycle(format!(
                "ProxyJump expansion reached '{alias}' twice"
            ))
            .log());
        }
        let opts = self.config.lookup(alias);
        for jump in proxy_jumps(alias, &opts)? {
            self.expand(&jump, seen, hops)?;
        }
        hops.push(self.hop_spec(alias, &opts)?);
        Ok(())
    }

    /// Apply the connection policy to one alias's options.
    pub fn hop_spec(&self, alias: &str, opts: &HostOptions) -> Result<HopSpec, TransferError> {
        let violation = |what: &str| {
            TransferError::policy_violation(format!("host '{alias}': {what}")).log()
        };

        if !opts.is_yes("StrictHostKeyChecking") {
            return Err(violation("StrictHostKeyChecking must be 'yes'"));
        }
        if !opts.is_yes("VerifyHostKeyDNS") {
            return Err(violation("VerifyHostKeyDNS must be 'yes'"));
        }

        let hostname = opts
            .first("HostName")
            .map(|h| h.replace("%h", alias).replace("%%", "%"))
            .unwrap_or_else(|| alias.to_string());
        if hostname.trim().is_empty() {
            return Err(violation("HostName is empty"));
        }
        let user = match opts.first("User") {
            Some(u) if !u.trim().is_empty() => u.to_string(),
            _ => return Err(violation("User must be set")),
        };

        let port = match opts.first("Port") {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| violation(&format!("Port '{p}' is not a valid port number")))?,
            None => self.default_port,
        };

        let identity_file = match opts.identity_files() {
            [] => None,
            [one] => Some(expand_path(one, &hostname, &user)),
            many => {
                return Err(violation(&format!(
                    "exactly one IdentityFile is allowed, found {}",
                    many.len()
                )))
            }
        };
        let identities_only = opts.is_yes("IdentitiesOnly");
        if identity_file.is_some() && !identities_only {
            return Err(violation("IdentitiesOnly must be 'yes' when an IdentityFile is set"));
        }

        let known_hosts_file = match opts.get("UserKnownHostsFile") {
            None => None,
            Some([one]) => Some(expand_path(one, &hostname, &user)),
            Some(many) => {
                return Err(violation(&format!(
                    "UserKnownHostsFile must name exactly one file, found {}",
                    many.len()
                )))
            }
        };

        let auth_preference = self
            .auth_overrides
            .get(&hostname)
            .or_else(|| self.auth_overrides.get(alias))
            .copied()
            .unwrap_or_default();

        Ok(HopSpec {
            alias: alias.to_string(),
            hostname,
            port,
            user,
            identity_file,
            known_hosts_file,
            strict_host_key_checking: true,
            verify_host_key_dns: true,
            identities_only,
            auth_preference,
        })
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }
}

/// Bare aliases named by `ProxyJump`, in connection order.
fn proxy_jumps(alias: &str, opts: &HostOptions) -> Result<Vec<String>, TransferError> {
    let Some(args) = opts.get("ProxyJump") else {
        return Ok(Vec::new());
    };
    if args.len() == 1 && args[0].eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }

    let mut jumps = Vec::new();
    for entry in args.iter().flat_map(|a| a.split(',')).map(str::trim).filter(|s| !s.is_empty()) {
        if entry.starts_with("ssh://") || entry.contains('@') || entry.contains(':') {
            return Err(TransferError::policy_violation(format!(
                "host '{alias}': ProxyJump entry '{entry}' must be a bare Host alias"
            ))
            .log());
        }
        jumps.push(entry.to_string());
    }
    Ok(jumps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqship_core::TransferErrorKind;

    const DEFAULTS: &str = "
Host *
    StrictHostKeyChecking yes
    VerifyHostKeyDNS yes
    User alice
";

    fn resolver(body: &str) -> ConfigResolver {
        let text = format!("{body}\n{DEFAULTS}");
        ConfigResolver::from_config(SshConfig::parse(&text).unwrap())
    }

    fn kind(result: Result<HopChain, TransferError>) -> TransferErrorKind {
        result.unwrap_err().kind
    }

    #[test]
    fn direct_target_resolves_to_single_hop() {
        let r = resolver("Host store\n    HostName store.example.org\n    Port 2222");
        let chain = r.resolve("store").unwrap();
        assert_eq!(chain.len(), 1);
        let hop = chain.target().unwrap();
        assert_eq!(hop.hostname, "store.example.org");
        assert_eq!(hop.port, 2222);
        assert_eq!(hop.user, "alice");
        assert_eq!(hop.known_hosts_name(), "[store.example.org]:2222");
    }

    #[test]
    fn hostname_defaults_to_alias() {
        let r = resolver("Host plain.example.org\n    Port 22");
        let chain = r.resolve("plain.example.org").unwrap();
        assert_eq!(chain.target().unwrap().hostname, "plain.example.org");
    }

    #[test]
    fn hostname_expands_percent_h() {
        let r = resolver("Host node1\n    HostName %h.cluster.example.org");
        let chain = r.resolve("node1").unwrap();
        assert_eq!(chain.target().unwrap().hostname, "node1.cluster.example.org");
    }

    #[test]
    fn chain_of_two_jumps_yields_three_hops() {
        let r = resolver(
            "Host target\n    HostName t.example.org\n    ProxyJump inner\n\
             Host inner\n    HostName i.example.org\n    ProxyJump outer\n\
             Host outer\n    HostName o.example.org",
        );
        let chain = r.resolve("target").unwrap();
        assert_eq!(chain.aliases(), vec!["outer", "inner", "target"]);
    }

    #[test]
    fn comma_separated_jump_list_keeps_order() {
        let r = resolver(
            "Host target\n    ProxyJump first,second\n\
             Host first\n    HostName f.example.org\n\
             Host second\n    HostName s.example.org",
        );
        let chain = r.resolve("target").unwrap();
        assert_eq!(chain.aliases(), vec!["first", "second", "target"]);
    }

    #[test]
    fn proxy_jump_none_means_direct() {
        let r = resolver("Host target\n    ProxyJump none");
        assert_eq!(r.resolve("target").unwrap().len(), 1);
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let r = resolver("Host target\n    ProxyJump target");
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::ProxyJumpCycle);
    }

    #[test]
    fn gateway_jumping_to_itself_is_a_cycle() {
        let r = resolver(
            "Host target\n    ProxyJump gateway\n\
             Host gateway\n    HostName gw.example.org\n    ProxyJump gateway",
        );
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::ProxyJumpCycle);
    }

    #[test]
    fn user_at_host_jump_is_rejected() {
        let r = resolver("Host target\n    ProxyJump bob@gw.example.org");
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::PolicyViolation);
    }

    #[test]
    fn uri_and_port_jumps_are_rejected() {
        let r = resolver("Host target\n    ProxyJump ssh://gw.example.org");
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::PolicyViolation);
        let r = resolver("Host target\n    ProxyJump gw:2200");
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::PolicyViolation);
    }

    #[test]
    fn missing_strict_host_key_checking_is_rejected() {
        let text = "Host target\n    VerifyHostKeyDNS yes\n    User alice";
        let r = ConfigResolver::from_config(SshConfig::parse(text).unwrap());
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::PolicyViolation);
    }

    #[test]
    fn verify_host_key_dns_no_is_rejected() {
        let r = resolver("Host target\n    VerifyHostKeyDNS no");
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::PolicyViolation);
    }

    #[test]
    fn missing_user_is_rejected() {
        let text = "Host target\n    StrictHostKeyChecking yes\n    VerifyHostKeyDNS yes";
        let r = ConfigResolver::from_config(SshConfig::parse(text).unwrap());
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::PolicyViolation);
    }

    #[test]
    fn jump_hops_are_policy_checked_too() {
        let text = "Host target\n    ProxyJump gw\n    StrictHostKeyChecking yes\n    VerifyHostKeyDNS yes\n    User alice\n\
                    Host gw\n    StrictHostKeyChecking no\n    VerifyHostKeyDNS yes\n    User alice";
        let r = ConfigResolver::from_config(SshConfig::parse(text).unwrap());
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::PolicyViolation);
    }

    #[test]
    fn two_identity_files_are_rejected() {
        let r = resolver(
            "Host target\n    IdentitiesOnly yes\n    IdentityFile /keys/a\n    IdentityFile /keys/b",
        );
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::PolicyViolation);
    }

    #[test]
    fn identity_file_requires_identities_only() {
        let r = resolver("Host target\n    IdentityFile /keys/a");
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::PolicyViolation);
    }

    #[test]
    fn single_identity_file_is_kept() {
        let r = resolver("Host target\n    IdentitiesOnly yes\n    IdentityFile /keys/id_%r");
        let hop = r.resolve("target").unwrap().target().unwrap().clone();
        assert_eq!(hop.identity_file, Some(PathBuf::from("/keys/id_alice")));
        assert!(hop.identities_only);
    }

    #[test]
    fn two_known_hosts_files_are_rejected() {
        let r = resolver("Host target\n    UserKnownHostsFile /a/known_hosts /b/known_hosts");
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::PolicyViolation);
    }

    #[test]
    fn first_value_wins_and_negation_excludes() {
        let text = format!(
            "Host *.example.org !bastion.example.org\n    User carol\n\
             Host *\n    User dave\n{DEFAULTS}"
        );
        let r = ConfigResolver::from_config(SshConfig::parse(&text).unwrap());
        let hop = r.resolve("db.example.org").unwrap().target().unwrap().clone();
        assert_eq!(hop.user, "carol");
        let hop = r.resolve("bastion.example.org").unwrap().target().unwrap().clone();
        assert_eq!(hop.user, "dave");
    }

    #[test]
    fn equals_syntax_and_quotes_are_accepted() {
        let r = resolver("Host target\n    HostName=\"t.example.org\"\n    Port=2022");
        let hop = r.resolve("target").unwrap().target().unwrap().clone();
        assert_eq!(hop.hostname, "t.example.org");
        assert_eq!(hop.port, 2022);
    }

    #[test]
    fn bad_port_is_a_policy_violation() {
        let r = resolver("Host target\n    Port ssh");
        assert_eq!(kind(r.resolve("target")), TransferErrorKind::PolicyViolation);
    }

    #[test]
    fn auth_override_is_attached_to_hop() {
        let r = resolver("Host legacy\n    HostName legacy.example.org").with_auth_overrides(
            HashMap::from([("legacy.example.org".to_string(), AuthPreference::Password)]),
        );
        let hop = r.resolve("legacy").unwrap().target().unwrap().clone();
        assert_eq!(hop.auth_preference, AuthPreference::Password);
    }

    #[test]
    fn include_pulls_in_other_file() {
        let dir = tempfile::tempdir().unwrap();
        let extra = dir.path().join("extra.conf");
        std::fs::write(&extra, "Host included\n    HostName inc.example.org\n").unwrap();
        let main = dir.path().join("config");
        std::fs::write(&main, format!("Include {}\n{DEFAULTS}", extra.display())).unwrap();

        let r = ConfigResolver::from_file(&main).unwrap();
        let hop = r.resolve("included").unwrap().target().unwrap().clone();
        assert_eq!(hop.hostname, "inc.example.org");
    }

    #[test]
    fn missing_file_is_config_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigResolver::from_file(&dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind, TransferErrorKind::ConfigNotFound);
    }
}
