use langflow_client::Tweaks;

/// Eco-friendly products advisor flow used when no `--flow` is given.
pub const FLOW_ID: &str = "2814e0aa-a990-4b9b-8c71-fe47e152282c";

const DEFAULT_TWEAKS: &str = include_str!("../assets/default_tweaks.json");

pub fn tweaks() -> Result<Tweaks, serde_json::Error> {
    Tweaks::from_json(DEFAULT_TWEAKS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_tweaks_parse() {
        let tweaks = tweaks().unwrap();
        assert_eq!(tweaks.len(), 12);
        let chat_input = tweaks.component("ChatInput-GbG9w").unwrap();
        assert_eq!(chat_input["sender"], "User");
        assert!(tweaks.component("note-34IK9").unwrap().is_empty());
    }
}
