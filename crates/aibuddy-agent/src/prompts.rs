//! User-turn prompts. The system turn is fixed by the completion client.

pub fn generate_prompt(description: &str) -> String {
    format!(
        "Generate a Linux bash command that will: {description}\nProvide ONLY the command with NO explanations."
    )
}

pub fn explain_prompt(command: &str) -> String {
    format!(
        "Explain what this Linux command does in detail:\n\n{command}\n\n\
         Break down each part of the command, any options/flags used, and potential side effects or security considerations."
    )
}

/// Embeds the failed command and everything it printed, each in its own
/// fenced block so the model can answer with a fenced fix.
pub fn repair_prompt(command: &str, output: &str) -> String {
    format!(
        "The following Linux command failed:\n\n```\n{command}\n```\n\n\
         With this error:\n```\n{output}\n```\n\n\
         Please provide a corrected version of the command that will work, and briefly explain what was wrong.\n"
    )
}
