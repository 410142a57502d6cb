use crate::llm::message::ConversationMessage;

/// Per-call input passed to every `GeneratorCapability::generate_stream`.
///
/// Bundles the new turn and its grounding so the trait signature stays
/// stable.  All fields borrow from the call site; the generator copies what
/// it needs into the assembled prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateRequest<'a> {
    /// User questions, joined with spaces into one turn.
    pub queries: &'a [String],
    /// Retrieved passages, joined with spaces into one context block.
    pub context: &'a [String],
    /// Prior chat history, oldest first.
    pub conversation: &'a [ConversationMessage],
}

impl<'a> GenerateRequest<'a> {
    pub fn new(
        queries: &'a [String],
        context: &'a [String],
        conversation: &'a [ConversationMessage],
    ) -> Self {
        Self {
            queries,
            context,
            conversation,
        }
    }
}
