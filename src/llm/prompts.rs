use crate::llm::message::{ChatMessage, ConversationMessage, PromptMessage};

/// System preamble used when the config does not override it.
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a chatbot for Retrieval Augmented Generation (RAG). \
You will receive a user query and context pieces that have a semantic similarity to that query. \
Answer the query using only the provided context. \
If the context does not contain enough information, say so. \
If the user asks about you as a chatbot, answer naturally. \
If the answer requires code examples, wrap them in ```language-name ``` blocks and do not write pseudo-code.";

/// Build the message sequence for one generation call.
///
/// The result is the system preamble, the prior conversation unchanged and
/// in order, then a single user turn carrying the joined context and the
/// joined queries.  No truncation against the backend's context window is
/// done here.
pub fn assemble(
    queries: &[String],
    context: &[String],
    conversation: &[ConversationMessage],
    system_preamble: &str,
) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(conversation.len() + 2);
    messages.push(ChatMessage::system(system_preamble));
    messages.extend(conversation.iter().cloned());
    messages.push(ChatMessage::user(user_turn(queries, context)));
    messages
}

fn user_turn(queries: &[String], context: &[String]) -> String {
    let query = queries.join(" ");
    let user_context = context.join(" ");
    format!("With this provided context: '{user_context}' Please answer this query: '{query}'")
}
