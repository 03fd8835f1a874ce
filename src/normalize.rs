use once_cell::sync::Lazy;
use regex::Regex;

static BRACKET_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\[\]]*\]|\([^()]*\)|\{[^{}]*\}").unwrap());

static LEADING_ARTICLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:the|a|an|le|la|les)\s+").unwrap());

static TRAILING_ARTICLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*(?:the|a|an|le|la|les)\s*$").unwrap());

/// Reduce a title to its canonical comparison key: case-folded, bracket
/// groups stripped, leading/trailing articles removed, every run of
/// non-alphanumeric characters collapsed to a single space.
///
/// Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(title: &str) -> String {
    let mut current = title.to_string();
    // One pass can expose a new leading article ("-The X" only sheds its
    // dash in the punctuation step), so run to a fixpoint.
    loop {
        let next = normalize_pass(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn normalize_pass(title: &str) -> String {
    let mut s = title.to_lowercase();

    // Bracket groups, innermost first when nested.
    loop {
        let stripped = BRACKET_GROUP.replace_all(&s, " ").into_owned();
        if stripped == s {
            break;
        }
        s = stripped;
    }

    // Articles on either side of a comma ("The X" and "X, The").
    s = LEADING_ARTICLE.replace(&s, "").into_owned();
    s = TRAILING_ARTICLE.replace(&s, "").into_owned();

    // Non-alphanumeric runs become a single space; Unicode categories
    // decide what counts as alphanumeric.
    let replaced: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_collapses_punctuation() {
        assert_eq!(normalize("Bungo Stray Dogs: Wan!"), "bungo stray dogs wan");
        assert_eq!(normalize("SPY×FAMILY"), "spy family");
    }

    #[test]
    fn strips_bracket_groups() {
        assert_eq!(normalize("[Group] Berserk (2021) {v2}"), "berserk");
        assert_eq!(normalize("Title [outer [inner] tail]"), "title");
    }

    #[test]
    fn strips_articles_on_both_sides_of_comma() {
        assert_eq!(normalize("The Promised Neverland"), "promised neverland");
        assert_eq!(normalize("Promised Neverland, The"), "promised neverland");
        assert_eq!(normalize("Le Portrait de Petit Cossette"), "portrait de petit cossette");
    }

    #[test]
    fn keeps_article_like_words_inside_titles() {
        assert_eq!(normalize("Theory of Everything"), "theory of everything");
        assert_eq!(normalize("A"), "a");
    }

    #[test]
    fn handles_accented_latin() {
        assert_eq!(normalize("Kimi ni Todoke ~Café~"), "kimi ni todoke café");
        assert_eq!(normalize("ÉTÉ"), "été");
    }

    #[test]
    fn idempotent_on_assorted_inputs() {
        for s in [
            "The Witch and the Beast",
            "-The X",
            "[A] (B) {C} D, The",
            "Kaiju No. 8",
            "the the x",
            "  spaced   out  ",
            "進撃の巨人 (2009)",
            "",
        ] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn empty_and_symbol_only_inputs_normalize_to_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("!!! --- ***"), "");
    }
}
