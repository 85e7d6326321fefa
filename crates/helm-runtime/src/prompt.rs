use chrono::Local;
use helm_core::ToolSpec;

const GUIDELINES: &str = "\
Guidelines:
1. Verify the target before acting; take a screenshot when unsure.
2. Confirm the result of each action from the returned screenshot.
3. If an action fails, read the error and adjust instead of repeating it.
4. Never access sensitive data or credentials.
5. Chain actions when it is efficient.";

/// Default system prompt listing the registered tools.
pub fn default_system_prompt(tools: &[ToolSpec]) -> String {
    let mut prompt =
        String::from("You are an assistant that can operate a computer and a mobile device.\n\n");
    prompt.push_str("Available tools:\n");
    for t in tools {
        let first_line = t.description.lines().next().unwrap_or_default();
        prompt.push_str(&format!("- {}: {}\n", t.name, first_line));
    }
    prompt.push_str(&format!(
        "\nCurrent date: {}\n\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    prompt.push_str(GUIDELINES);
    prompt
}
