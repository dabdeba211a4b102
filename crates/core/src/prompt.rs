pub const NOT_IN_CONTEXT_REPLY: &str =
    "I don't have enough information in the document to answer that.";

const CHUNK_SEPARATOR: &str = "\n\n";

/// Joins retrieved chunks until the next whole chunk would exceed `budget`
/// characters. Chunks are never cut.
pub fn build_context(chunks: &[String], budget: usize) -> String {
    let mut context = String::new();
    let mut used = 0usize;

    for chunk in chunks {
        let separator = if context.is_empty() { 0 } else { CHUNK_SEPARATOR.len() };
        let cost = separator + chunk.chars().count();
        if used + cost > budget {
            break;
        }
        if separator > 0 {
            context.push_str(CHUNK_SEPARATOR);
        }
        context.push_str(chunk);
        used += cost;
    }

    context
}

pub fn compose_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a helpful assistant answering questions about an uploaded document.\n\
         Answer the question using only the context below. If the answer is not \
         contained in the context, reply exactly: \"{NOT_IN_CONTEXT_REPLY}\"\n\n\
         Context:\n{context}\n\n\
         Question: {question}\n\n\
         Answer:"
    )
}
