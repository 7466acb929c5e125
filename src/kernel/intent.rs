//! Intent detection — maps an input to a primary category plus entities.
//!
//! Each registered pattern carries keyword cues, regex cues (stronger
//! weight), and a category weight. Entity extraction runs independently
//! of classification, so even an `unknown` intent carries any paths,
//! URLs, handles, extensions, and package names found in the input.

use regex::Regex;

use crate::types::{EntitySet, Intent, IntentCategory, SubIntent};

/// Minimum normalized score for a classification; below it the intent
/// is `unknown`.
const MIN_SCORE: f64 = 0.1;
/// Second-best score above which the intent is flagged multi-intent.
const MULTI_INTENT_THRESHOLD: f64 = 0.5;
/// Confidence reported for unclassified input.
const UNKNOWN_CONFIDENCE: f64 = 0.5;
/// Keyword hits score 1, regex hits score 2; a raw score of 4 maps to
/// full confidence.
const SCORE_CEILING: f64 = 4.0;

/// File extensions recognised as entities.
const KNOWN_EXTENSIONS: &[&str] = &[
    "txt", "md", "rs", "py", "js", "ts", "tsx", "json", "toml", "yaml", "yml", "csv", "log",
    "html", "css", "sh", "go", "java", "c", "cpp", "h", "pdf", "png", "jpg",
];

/// One scored intent pattern.
struct IntentPattern {
    category: IntentCategory,
    keywords: &'static [&'static str],
    regexes: Vec<Regex>,
    weight: f64,
}

/// Pattern-table intent classifier.
pub struct IntentClassifier {
    patterns: Vec<IntentPattern>,
    url_re: Regex,
    package_re: Regex,
    handle_re: Regex,
    path_re: Regex,
    filename_re: Regex,
    extension_re: Regex,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    /// Build the classifier with the default pattern table.
    pub fn new() -> Self {
        let patterns = vec![
            pattern(
                IntentCategory::FileRead,
                &["read", "open", "show", "display", "cat", "view"],
                &[r"(?i)\bread\b.*\.[a-z0-9]+", r"(?i)\b(?:open|cat|view)\s+\S*\.[a-z0-9]+"],
                1.0,
            ),
            pattern(
                IntentCategory::FileWrite,
                &["write", "save", "append", "overwrite"],
                &[
                    r"(?i)\b(?:write|save|append)\b.*(?:\bfile\b|\.[a-z0-9]+)",
                    r"(?i)\bcreate\s+(?:a\s+)?(?:new\s+)?file\b",
                ],
                1.0,
            ),
            pattern(
                IntentCategory::FileSearch,
                &["search", "find", "locate", "grep"],
                &[r"(?i)\b(?:search|find|grep|locate)\b.*(?:\bfiles?\b|\bfolders?\b|\*\.)"],
                1.0,
            ),
            pattern(
                IntentCategory::ShellCommand,
                &["run", "execute", "shell", "terminal", "command"],
                &[
                    r"(?i)\b(?:run|execute)\s+\S+",
                    r"(?i)^(?:ls|pwd|cd|git|npm|cargo|make|docker)\b",
                ],
                1.0,
            ),
            pattern(
                IntentCategory::NetworkRequest,
                &["fetch", "download", "request", "http", "url"],
                &[r"https?://\S+"],
                1.0,
            ),
            pattern(
                IntentCategory::GithubQuery,
                &["github", "repository", "repo", "issues", "pull request"],
                &[r"@[A-Za-z][A-Za-z0-9-]*\b", r"(?i)github\.com"],
                1.0,
            ),
            pattern(
                IntentCategory::Automation,
                &["automate", "schedule", "workflow", "trigger", "recurring"],
                &[r"(?i)\bevery\s+(?:day|hour|week|morning|\d+)"],
                1.0,
            ),
            pattern(
                IntentCategory::QueryKnowledge,
                &["what", "why", "how", "explain", "who", "when"],
                &[r"(?i)^(?:what|why|how|who|when)\b"],
                0.8,
            ),
            pattern(
                IntentCategory::MultiPc,
                &["peer", "remote machine", "other computer", "all machines"],
                &[r"(?i)\bon\s+(?:all|my\s+other|the\s+other|every)\s+(?:pc|machine|computer)s?\b"],
                1.0,
            ),
            pattern(
                IntentCategory::MemoryRecall,
                &["remember", "recall", "last time", "previously"],
                &[r"(?i)\b(?:remember|recall)\b", r"(?i)\bwhat\s+did\s+(?:i|we)\b"],
                1.0,
            ),
            pattern(
                IntentCategory::CodeAnalysis,
                &["analyze", "analyse", "review", "lint", "refactor"],
                &[
                    r"(?i)\b(?:analy[sz]e|review|lint)\b.*\bcode\b",
                    r"(?i)\bcode\s*(?:base|quality|analysis)\b",
                ],
                1.0,
            ),
            pattern(
                IntentCategory::Planning,
                &["plan", "organize", "organise", "roadmap", "outline"],
                &[r"(?i)\b(?:make|create|draft)\s+(?:a\s+)?plan\b"],
                1.0,
            ),
        ];

        Self {
            patterns,
            url_re: compile(r"https?://[^\s)>\]]+"),
            package_re: compile(r"@[a-z0-9][a-z0-9._-]*/[a-z0-9][a-z0-9._-]*"),
            handle_re: compile(r"@([A-Za-z][A-Za-z0-9-]*)\b"),
            path_re: compile(r"(?:~|\.{1,2})?/[\w][\w./-]*|[A-Za-z]:\\[\w\\.-]+"),
            filename_re: compile(r"\b[\w-]+\.([a-z0-9]{1,5})\b"),
            extension_re: compile(r"\*?\.([a-z0-9]{1,5})\b"),
        }
    }

    /// Classify an input. Never fails; unclassified input returns the
    /// `unknown` intent with confidence 0.5.
    pub fn detect(&self, input: &str) -> Intent {
        let entities = self.extract_entities(input);
        let lower = input.to_lowercase();

        let mut scores: Vec<(IntentCategory, f64)> = self
            .patterns
            .iter()
            .filter_map(|p| {
                let raw = score_pattern(p, input, &lower);
                if raw > 0.0 {
                    Some((p.category, (raw * p.weight / SCORE_CEILING).min(1.0)))
                } else {
                    None
                }
            })
            .collect();
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let Some(&(category, confidence)) = scores.first().filter(|entry| entry.1 >= MIN_SCORE)
        else {
            return Intent {
                category: IntentCategory::Unknown,
                confidence: UNKNOWN_CONFIDENCE,
                entities,
                multi_intent: false,
                sub_intents: Vec::new(),
            };
        };

        let sub_intents: Vec<SubIntent> = scores
            .iter()
            .skip(1)
            .filter(|entry| entry.1 >= MULTI_INTENT_THRESHOLD)
            .take(2)
            .map(|&(category, confidence)| SubIntent {
                category,
                confidence,
            })
            .collect();
        let multi_intent = !sub_intents.is_empty();

        Intent {
            category,
            confidence,
            entities,
            multi_intent,
            sub_intents,
        }
    }

    /// Scan the input for paths, URLs, handles, extensions, and packages.
    pub fn extract_entities(&self, input: &str) -> EntitySet {
        let mut entities = EntitySet::default();

        for m in self.url_re.find_iter(input) {
            push_unique(&mut entities.urls, m.as_str().trim_end_matches(['.', ',']));
        }
        // Mask URLs so their path components don't surface as file paths.
        let masked = self.url_re.replace_all(input, " ");

        for m in self.package_re.find_iter(&masked) {
            push_unique(&mut entities.packages, m.as_str());
        }
        let masked = self.package_re.replace_all(&masked, " ");

        for caps in self.handle_re.captures_iter(&masked) {
            if let Some(handle) = caps.get(1) {
                push_unique(&mut entities.github_users, handle.as_str());
            }
        }

        for m in self.path_re.find_iter(&masked) {
            push_unique(&mut entities.paths, m.as_str().trim_end_matches(['.', ',']));
        }
        for caps in self.filename_re.captures_iter(&masked) {
            let ext_known = caps
                .get(1)
                .is_some_and(|ext| KNOWN_EXTENSIONS.contains(&ext.as_str()));
            if let Some(whole) = caps.get(0) {
                // Bare filenames count as relative paths when the
                // extension is recognised and no slash already matched it.
                if ext_known && !entities.paths.iter().any(|p| p.ends_with(whole.as_str())) {
                    push_unique(&mut entities.paths, whole.as_str());
                }
            }
        }

        for caps in self.extension_re.captures_iter(&masked) {
            if let Some(ext) = caps.get(1) {
                if KNOWN_EXTENSIONS.contains(&ext.as_str()) {
                    push_unique(&mut entities.file_extensions, ext.as_str());
                }
            }
        }

        entities
    }
}

fn pattern(
    category: IntentCategory,
    keywords: &'static [&'static str],
    regexes: &[&str],
    weight: f64,
) -> IntentPattern {
    IntentPattern {
        category,
        keywords,
        regexes: regexes.iter().filter_map(|r| Regex::new(r).ok()).collect(),
        weight,
    }
}

/// Compile a static pattern; the table only holds expressions the tests
/// exercise.
#[allow(clippy::unwrap_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

/// Keyword hits score 1 each; regex hits score 2 each.
fn score_pattern(pattern: &IntentPattern, input: &str, lower: &str) -> f64 {
    let keyword_hits = pattern
        .keywords
        .iter()
        .filter(|k| contains_word(lower, k))
        .count();
    let regex_hits = pattern.regexes.iter().filter(|r| r.is_match(input)).count();
    let hits = keyword_hits.saturating_add(regex_hits.saturating_mul(2));
    u32::try_from(hits).map(f64::from).unwrap_or(0.0)
}

fn contains_word(haystack: &str, word: &str) -> bool {
    if word.contains(' ') {
        return haystack.contains(word);
    }
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|t| t == word)
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !list.iter().any(|v| v == value) {
        list.push(value.to_owned());
    }
}
