use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Synonym table: alias → canonical skill.
///
/// Every canonical form also maps to itself, so feeding normalized output back
/// through `normalize` is a no-op.
static ALIAS_TO_CANONICAL: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let aliases: &[(&str, &[&str])] = &[
        // Data / ML
        (
            "machine learning",
            &["ml", "machine-learning", "machine learning engineering"],
        ),
        ("artificial intelligence", &["ai", "a.i."]),
        ("deep learning", &["dl", "deep neural networks", "neural networks"]),
        ("natural language processing", &["nlp"]),
        ("data analysis", &["data analytics", "data analyst"]),
        ("tensorflow", &["tf", "tensor flow"]),
        ("pytorch", &["torch", "py torch"]),
        ("scikit-learn", &["sklearn", "scikit learn", "scikit"]),
        ("pandas", &["python pandas"]),
        // Languages
        ("python", &["py", "python3", "python 3", "python2", "python 2.7"]),
        ("javascript", &["js", "ecmascript", "es6", "es2015", "java script"]),
        ("typescript", &["ts", "type script"]),
        ("golang", &["go", "go lang"]),
        ("csharp", &["c#", "c sharp", ".net", "dotnet"]),
        ("cplusplus", &["c++", "cpp", "c plus plus"]),
        ("rust", &["rust lang", "rustlang"]),
        ("java", &["java8", "java11", "java17", "openjdk"]),
        ("ruby", &["ruby lang"]),
        ("php", &["php7", "php8"]),
        ("kotlin", &["kotlin jvm"]),
        // Data stores
        ("database", &["db", "databases", "dbms", "rdbms"]),
        ("sql", &["structured query language", "sql queries"]),
        ("postgresql", &["postgres", "pg", "postgre sql"]),
        ("mysql", &["my sql"]),
        ("mongodb", &["mongo", "mongo db"]),
        ("redis", &["redis cache"]),
        ("elasticsearch", &["elastic search"]),
        // Frontend / backend
        ("react", &["reactjs", "react.js", "react js"]),
        ("vue", &["vuejs", "vue.js"]),
        ("angular", &["angularjs", "angular.js"]),
        ("nodejs", &["node", "node.js", "node js"]),
        ("django", &["django rest framework", "drf"]),
        ("spring", &["spring boot", "springboot"]),
        ("rest api", &["rest", "restful", "restful api", "rest apis"]),
        ("graphql", &["graph ql"]),
        // Cloud / ops
        ("aws", &["amazon web services", "amazon aws"]),
        ("gcp", &["google cloud", "google cloud platform"]),
        ("azure", &["microsoft azure", "ms azure"]),
        ("kubernetes", &["k8s", "kube"]),
        ("docker", &["docker container", "containers"]),
        ("ci/cd", &["cicd", "continuous integration", "continuous delivery"]),
        ("terraform", &["infrastructure as code", "iac"]),
        ("git", &["github", "gitlab", "version control"]),
        ("linux", &["gnu/linux"]),
        ("blockchain", &["block chain", "distributed ledger"]),
        // Business / soft skills
        ("excel", &["ms excel", "microsoft excel", "spreadsheets"]),
        ("communication", &["communication skills", "communications"]),
        ("project management", &["pm", "project manager", "pmp"]),
        ("ux design", &["ux", "user experience", "user experience design"]),
        ("agile", &["scrum", "agile methodologies"]),
    ];

    let mut map = HashMap::new();
    for (canonical, alias_list) in aliases {
        for alias in *alias_list {
            map.insert(*alias, *canonical);
        }
    }
    // Canonical entries win over any alias that happens to share their spelling.
    for (canonical, _) in aliases {
        map.insert(*canonical, *canonical);
    }
    map
});

/// Separator-free keys so punctuation variants (`Node.js`, `node-js`) resolve too.
static COMPACT_ALIAS_TO_CANONICAL: LazyLock<HashMap<String, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    let mut entries: Vec<_> = ALIAS_TO_CANONICAL.iter().collect();
    entries.sort();

    // Canonical forms first so they own their compact key.
    for (_, canonical) in &entries {
        map.insert(compact_key(canonical), **canonical);
    }
    for (alias, canonical) in &entries {
        map.entry(compact_key(alias)).or_insert(**canonical);
    }

    map
});

fn nfkc_lower_trim(input: &str) -> String {
    input
        .nfkc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn compact_key(input: &str) -> String {
    input
        .nfkc()
        .collect::<String>()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '.' | '-' | '_' | '/'))
        .collect()
}

fn match_canonical_token(token: &str) -> Option<&'static str> {
    if let Some(canonical) = ALIAS_TO_CANONICAL.get(token) {
        return Some(*canonical);
    }

    let compact = compact_key(token);
    if compact.is_empty() {
        return None;
    }
    COMPACT_ALIAS_TO_CANONICAL.get(&compact).copied()
}

/// Canonicalizes a single raw skill token. Returns `None` for blank input.
///
/// Unknown tokens come back lower-cased and whitespace-collapsed but otherwise
/// unchanged.
pub fn normalize_skill(skill: &str) -> Option<String> {
    let token = nfkc_lower_trim(skill);
    if token.is_empty() {
        return None;
    }

    match match_canonical_token(&token) {
        Some(canonical) => Some(canonical.to_string()),
        None => Some(token),
    }
}

/// Canonicalizes a list of raw skill strings into a [`SkillSet`].
///
/// Lower-cases, trims, resolves synonyms, drops empty tokens and removes
/// duplicates while keeping first-seen order. Pure: the same input always
/// produces the same set, so the output is safe to use as a cache key.
pub fn normalize<S: AsRef<str>>(raw: &[S]) -> SkillSet {
    let mut seen = HashSet::new();
    let mut skills = Vec::with_capacity(raw.len());

    for item in raw {
        let Some(skill) = normalize_skill(item.as_ref()) else {
            continue;
        };
        if seen.insert(skill.clone()) {
            skills.push(skill);
        }
    }

    SkillSet(skills)
}

/// Ordered, de-duplicated list of canonical skills.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkillSet(Vec<String>);

impl SkillSet {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn contains(&self, skill: &str) -> bool {
        self.0.iter().any(|s| s == skill)
    }

    /// Skills of `self` that also appear in `other`, in `self`'s order.
    pub fn intersection(&self, other: &SkillSet) -> SkillSet {
        let other: HashSet<&str> = other.0.iter().map(String::as_str).collect();
        SkillSet(
            self.0
                .iter()
                .filter(|s| other.contains(s.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Skills of `self` missing from `other`, in `self`'s order.
    pub fn difference(&self, other: &SkillSet) -> SkillSet {
        let other: HashSet<&str> = other.0.iter().map(String::as_str).collect();
        SkillSet(
            self.0
                .iter()
                .filter(|s| !other.contains(s.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Keeps the first `n` skills.
    pub fn truncated(&self, n: usize) -> SkillSet {
        SkillSet(self.0.iter().take(n).cloned().collect())
    }

    /// Builds a set from skills that are already canonical. Duplicates are
    /// dropped but no synonym resolution happens.
    pub(crate) fn from_canonical(skills: impl IntoIterator<Item = String>) -> Self {
        let mut seen = HashSet::new();
        SkillSet(
            skills
                .into_iter()
                .filter(|s| seen.insert(s.clone()))
                .collect(),
        )
    }

    /// Text handed to embedding providers: one canonical skill per line.
    pub fn to_embedding_text(&self) -> String {
        self.0.join("\n")
    }

    /// Content fingerprint: lowercase hex SHA-256 over the newline-joined skills.
    ///
    /// Order-sensitive. A cached embedding whose fingerprint differs from the
    /// current one is stale.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_embedding_text().as_bytes());
        let bytes = hasher.finalize();
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl<'a> IntoIterator for &'a SkillSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resolves_common_synonyms() {
        let skills = normalize(&["ML", "py", "SQL"]);
        assert_eq!(
            skills.into_vec(),
            strings(&["machine learning", "python", "sql"])
        );
    }

    #[test]
    fn db_maps_to_database_but_sql_stays() {
        let skills = normalize(&["db", "sql", "Databases"]);
        assert_eq!(skills.into_vec(), strings(&["database", "sql"]));
    }

    #[test]
    fn dedupes_preserving_first_seen_order() {
        let skills = normalize(&["Python", "excel", "python3", "  PY ", "Excel"]);
        assert_eq!(skills.into_vec(), strings(&["python", "excel"]));
    }

    #[test]
    fn drops_blank_tokens() {
        let skills = normalize(&["", "   ", "\t", "rust"]);
        assert_eq!(skills.into_vec(), strings(&["rust"]));
    }

    #[test]
    fn unknown_tokens_pass_through_lowercased() {
        assert_eq!(
            normalize_skill("  MyCustom   Framework ").as_deref(),
            Some("mycustom framework")
        );
        assert_eq!(normalize_skill("javaa").as_deref(), Some("javaa"));
    }

    #[test]
    fn normalizes_fullwidth_and_punctuation_variants() {
        assert_eq!(normalize_skill("ＡＷＳ").as_deref(), Some("aws"));
        assert_eq!(normalize_skill("Node.JS").as_deref(), Some("nodejs"));
        assert_eq!(normalize_skill("node-js").as_deref(), Some("nodejs"));
        assert_eq!(normalize_skill("K8s").as_deref(), Some("kubernetes"));
        assert_eq!(normalize_skill("C#").as_deref(), Some("csharp"));
        assert_eq!(normalize_skill("CI/CD").as_deref(), Some("ci/cd"));
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            strings(&["ML", "py", "SQL", "db", "Node.js", "ＡＷＳ"]),
            strings(&["Machine-Learning", "scikit learn", "unknown  thing", "c++"]),
            strings(&["communication skills", "PM", "ux", "react js", "go"]),
        ];

        for raw in inputs {
            let once = normalize(&raw);
            let twice = normalize(once.as_slice());
            assert_eq!(once, twice, "normalize must be idempotent for {raw:?}");
        }
    }

    #[test]
    fn every_canonical_form_is_a_fixed_point() {
        for canonical in ALIAS_TO_CANONICAL.values() {
            assert_eq!(
                normalize_skill(canonical).as_deref(),
                Some(*canonical),
                "canonical {canonical} must map to itself"
            );
        }
    }

    #[test]
    fn set_operations_keep_left_order() {
        let job = normalize(&["python", "sql", "docker"]);
        let candidate = normalize(&["docker", "python", "excel"]);

        assert_eq!(
            job.intersection(&candidate).into_vec(),
            strings(&["python", "docker"])
        );
        assert_eq!(job.difference(&candidate).into_vec(), strings(&["sql"]));
    }

    #[test]
    fn fingerprint_tracks_content_and_order() {
        let a = normalize(&["python", "sql"]);
        let b = normalize(&["py", "SQL"]);
        let c = normalize(&["sql", "python"]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
