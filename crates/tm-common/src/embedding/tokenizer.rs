use crate::skill_normalizer::SkillSet;

/// 重み付きトークン
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedToken {
    pub token: String,
    pub weight: f32,
}

impl WeightedToken {
    pub fn new(token: impl Into<String>, weight: f32) -> Self {
        Self {
            token: token.into(),
            weight,
        }
    }
}

const SKILL_WEIGHT: f32 = 1.0;
const TERM_WEIGHT: f32 = 0.5;

/// Token layout fed to the hash provider:
/// - skill:<canonical>   whole canonical skill
/// - term:<word>         each word of the skill, so related multi-word skills
///                       ("machine learning", "deep learning") overlap partially
pub fn tokenize_skills(skills: &SkillSet) -> Vec<WeightedToken> {
    let mut tokens = Vec::with_capacity(skills.len() * 2);

    for skill in skills {
        tokens.push(WeightedToken::new(format!("skill:{skill}"), SKILL_WEIGHT));
        for term in skill_terms(skill) {
            tokens.push(WeightedToken::new(format!("term:{term}"), TERM_WEIGHT));
        }
    }

    tokens
}

/// Splits a canonical skill into lower-case word terms. Shared with the BM25
/// index so both signals agree on what a "word" is.
pub fn skill_terms(skill: &str) -> impl Iterator<Item = &str> + '_ {
    skill
        .split(|c: char| !(c.is_alphanumeric() || matches!(c, '+' | '#')))
        .filter(|term| !term.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skill_normalizer::normalize;

    #[test]
    fn emits_skill_and_term_tokens() {
        let tokens = tokenize_skills(&normalize(&["machine learning"]));
        let names: Vec<_> = tokens.iter().map(|t| t.token.as_str()).collect();
        assert_eq!(
            names,
            vec!["skill:machine learning", "term:machine", "term:learning"]
        );
        assert_eq!(tokens[0].weight, SKILL_WEIGHT);
        assert_eq!(tokens[1].weight, TERM_WEIGHT);
    }

    #[test]
    fn splits_terms_on_punctuation_but_keeps_language_symbols() {
        let terms: Vec<_> = skill_terms("ci/cd").collect();
        assert_eq!(terms, vec!["ci", "cd"]);

        let terms: Vec<_> = skill_terms("c++").collect();
        assert_eq!(terms, vec!["c++"]);
    }
}
