//! Detection of completion claims the turn cannot back up.
//!
//! A model sometimes answers "Table dropped successfully." without ever
//! calling a tool. When the request named an operation, the reply claims it
//! happened, and nothing has succeeded this turn, the reply is rejected and
//! the model is told to actually run the operation.

/// Operation verbs looked for in the user's request, as whole words.
pub const OPERATION_VERBS: &[&str] = &[
    "DROP", "CREATE", "DELETE", "INSERT", "UPDATE", "SELECT", "SHOW", "ALTER",
];

/// Phrases that claim the work is done, matched case-insensitively.
pub const COMPLETION_CLAIMS: &[&str] = &[
    "successfully",
    "has been",
    "have been",
    "completed",
    "done",
    "created",
    "dropped",
    "deleted",
    "inserted",
    "updated",
    "altered",
    "executed",
];

/// System message appended when a claim is rejected.
pub const CORRECTION_PROMPT: &str = "\
Your previous reply claimed the request was carried out, but no tool has \
succeeded in this turn, so nothing was actually done. Call the appropriate \
tool now to perform the operation, then report the real result.";

/// Whether `content` claims an operation from `user_text` that no tool
/// performed.
pub fn claims_unverified_completion(user_text: &str, content: &str, tool_succeeded: bool) -> bool {
    if tool_succeeded {
        return false;
    }
    let names_operation = user_text
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|word| {
            OPERATION_VERBS
                .iter()
                .any(|verb| word.eq_ignore_ascii_case(verb))
        });
    if !names_operation {
        return false;
    }
    let lower = content.to_lowercase();
    COMPLETION_CLAIMS.iter().any(|claim| lower.contains(claim))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_claim_without_tool() {
        assert!(claims_unverified_completion(
            "drop table users",
            "The table has been dropped.",
            false
        ));
        assert!(claims_unverified_completion(
            "please CREATE a table for orders",
            "Created successfully!",
            false
        ));
    }

    #[test]
    fn accepts_claim_after_successful_tool() {
        assert!(!claims_unverified_completion(
            "drop table users",
            "The table has been dropped.",
            true
        ));
    }

    #[test]
    fn ignores_requests_without_operation_verb() {
        assert!(!claims_unverified_completion(
            "what is a foreign key?",
            "Done explaining: a foreign key references another table.",
            false
        ));
        // Substrings of longer words do not count.
        assert!(!claims_unverified_completion("showcase the dropdown", "done", false));
    }

    #[test]
    fn ignores_replies_without_claim() {
        assert!(!claims_unverified_completion(
            "delete old rows",
            "Which table should I delete from?",
            false
        ));
    }
}
