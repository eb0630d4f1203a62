//! Grounded prompt assembly and the single call to the generator.

use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    generator::Generator,
    retriever::RetrievalResult,
    text_util::truncate_chars,
};

pub const DEFAULT_PROMPT_TEMPLATE: &str = "Context: {context}\n\nQuestion: {query}\n\nBased on the context provided, please answer the question:";

/// Default bound on the context block, in characters.
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 6000;

/// Appended to the question when answering without the documents.
pub const IGNORE_CONTEXT_SUFFIX: &str =
    " sorry, ignore any provided context, just provide a general answer";

const CONTEXT_PLACEHOLDER: &str = "{context}";
const QUERY_PLACEHOLDER: &str = "{query}";

/// Prompt template with `{context}` and `{query}` placeholders.
///
/// # Examples
///
/// ```
/// use docwhisper::generation::PromptTemplate;
///
/// let template = PromptTemplate::new("Q: {query}\nC: {context}").unwrap();
/// assert_eq!(template.render("{query}", "why?"), "Q: why?\nC: {query}");
///
/// assert!(PromptTemplate::new("no placeholders").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        for placeholder in [CONTEXT_PLACEHOLDER, QUERY_PLACEHOLDER] {
            if !template.contains(placeholder) {
                return Err(Error::Config(format!(
                    "prompt template must contain {placeholder}"
                )));
            }
        }
        Ok(Self { template })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitute both placeholders in one pass.
    ///
    /// Inserted text is copied verbatim and never scanned for placeholders.
    pub fn render(&self, context: &str, query: &str) -> String {
        let mut out = String::with_capacity(
            self.template.len() + context.len() + query.len(),
        );
        let mut rest = self.template.as_str();

        while let Some(pos) = rest.find('{') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix(CONTEXT_PLACEHOLDER) {
                out.push_str(context);
                rest = after;
            } else if let Some(after) = tail.strip_prefix(QUERY_PLACEHOLDER) {
                out.push_str(query);
                rest = after;
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationConfig {
    pub template: PromptTemplate,
    pub max_context_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            template: PromptTemplate::default(),
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }
}

/// Join chunk texts in rank order into a block of at most `max_chars` chars.
///
/// Chunks are kept while they fit; the first one that does not fit is
/// dropped along with everything ranked below it. A top chunk that alone
/// exceeds the bound is truncated instead of dropped.
pub fn build_context<'a>(
    texts: impl IntoIterator<Item = &'a str>,
    max_chars: usize,
) -> String {
    let mut context = String::new();
    let mut used = 0usize;

    for (i, text) in texts.into_iter().enumerate() {
        let len = text.chars().count();
        if i == 0 {
            let kept = truncate_chars(text, max_chars);
            used = kept.chars().count();
            context.push_str(kept);
            if used < len {
                debug!(len, max_chars, "top chunk truncated to fit context");
                break;
            }
            continue;
        }

        let needed = len + 1;
        if used + needed > max_chars {
            debug!(kept = i, "dropping lower-ranked chunks from context");
            break;
        }
        context.push('\n');
        context.push_str(text);
        used += needed;
    }

    context
}

/// Render the grounded prompt for `query` from retrieved chunks.
pub fn build_prompt(
    query: &str,
    retrieved: &RetrievalResult,
    config: &GenerationConfig,
) -> String {
    let context = build_context(retrieved.texts(), config.max_context_chars);
    config.template.render(&context, query)
}

/// Build the prompt and call the generator exactly once.
pub fn generate<G: Generator + ?Sized>(
    generator: &G,
    query: &str,
    retrieved: &RetrievalResult,
    config: &GenerationConfig,
) -> Result<String> {
    let prompt = build_prompt(query, retrieved, config);
    info!(
        chunks = retrieved.hits.len(),
        prompt_chars = prompt.chars().count(),
        "generating answer"
    );
    generator.complete(&prompt).map_err(|e| match e {
        Error::Generation(_) => e,
        other => Error::Generation(other.to_string()),
    })
}
