//! Fixed prompt text for the three generative calls.

use ragline_shared::FragmentSet;

/// System role for query rephrasing.
pub const REPHRASE_SYSTEM: &str = "You are a rephraser and always respond with a rephrased version of the input that is given to a search engine API. Always be succinct and use the same words as the input.";

/// System role for answer generation.
pub const ANSWER_SYSTEM: &str = "You are a answer generator, you will receive top results of similarity search, they are optional to use depending how well they help answer the query.";

/// System role for follow-up generation, with the expected JSON shape.
pub fn followup_system(query: &str) -> String {
    format!(
        "You are a follow-up answer generator and always respond with 4 follow-up questions based on this input \"{query}\" in JSON format. i.e. {{ \"follow_up\": [\"QUESTION_GOES_HERE\", \"QUESTION_GOES_HERE\", \"QUESTION_GOES_HERE\", \"QUESTION_GOES_HERE\"] }}"
    )
}

pub fn followup_user(query: &str) -> String {
    format!("Generate 4 follow-up questions based on this input \"{query}\"")
}

/// User content for answer generation: the query plus the fragments as JSON.
pub fn answer_user(query: &str, fragments: &FragmentSet) -> String {
    // FragmentSet serializes as a plain array of {text, source}; this cannot fail.
    let results = serde_json::to_string(fragments).unwrap_or_else(|_| "[]".to_string());
    format!("Query: {query}, Top Results: {results}")
}
