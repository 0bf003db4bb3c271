//! System prompt assembly for the agent node.

use super::state::SearchType;

/// Compose the system prompt for the active search type.
#[must_use]
pub fn system_prompt(
    search_type: SearchType,
    course_id: &str,
    slides_priority: &[String],
    has_snapshot: bool,
) -> String {
    let mut prompt = format!(
        "You are an assistant helping students understand their course materials.\n\
         Course ID: {course_id}"
    );
    if !slides_priority.is_empty() {
        prompt.push_str(&format!("\nPriority slides: {}", slides_priority.join(", ")));
    }

    prompt.push_str(
        "\n\nConversation history shows earlier tool outputs in truncated form. \
         To read the full content of an earlier tool result, call \
         retrieve_previous_sources with the tool message IDs you need.",
    );

    if has_snapshot {
        prompt.push_str(
            "\n\nThe user is currently viewing a page of the document; its image \
             is attached to their message. When your answer draws on that page, \
             cite it as [^Page].",
        );
    }

    match search_type {
        SearchType::Default => prompt.push_str(
            "\n\nAnswer from the conversation so far and your general knowledge. \
             No search tools are available for this question.",
        ),
        SearchType::Rag => prompt.push_str(
            "\n\nUse rag_search to find relevant course material before answering.\n\
             1. Decide whether the question needs new material or can be answered from the conversation.\n\
             2. If new material is needed, write a focused search query and call rag_search.\n\
             3. Answer from the retrieved content.\n\
             4. Cite course sources inline as [^n] (for several sources: [^n][^m]), placed after punctuation.",
        ),
        SearchType::Web => prompt.push_str(
            "\n\nUse web_search to find current information before answering.\n\
             1. Write an effective web query and call web_search.\n\
             2. Answer from the results.\n\
             3. Cite web sources inline as {^n} (for several sources: {^n}{^m}), placed after punctuation.",
        ),
        SearchType::RagWeb => prompt.push_str(
            "\n\nBoth course materials (rag_search) and the web (web_search) are available.\n\
             1. Use rag_search for course-specific material and web_search for current or supplementary information.\n\
             2. Synthesize across both.\n\
             3. Cite course sources as [^n] and web sources as {^n}, inline and after punctuation.",
        ),
    }

    prompt
}
