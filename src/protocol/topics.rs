//! MQTT topic construction and classification
//!
//! Outbound messages go to `Altizon/Datonis/<client_id>/<suffix>`; the platform
//! answers on `Altizon/Datonis/<client_id>/httpAck` and pushes instructions to
//! `Altizon/Datonis/<access_key>/thing/<thing_key>/executeInstruction`.

pub const TOPIC_ROOT: &str = "Altizon/Datonis";
pub const ACK_SUFFIX: &str = "httpAck";
pub const INSTRUCTION_SUFFIX: &str = "executeInstruction";

/// Kind of an inbound topic, decided by its last segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Ack,
    Instruction,
    Other,
}

/// Classify an inbound topic by suffix
pub fn classify_topic(topic: &str) -> TopicKind {
    if topic.ends_with(ACK_SUFFIX) {
        TopicKind::Ack
    } else if topic.ends_with(INSTRUCTION_SUFFIX) {
        TopicKind::Instruction
    } else {
        TopicKind::Other
    }
}

/// Topic names for one gateway session
#[derive(Debug, Clone)]
pub struct TopicBuilder {
    client_id: String,
    access_key: String,
}

impl TopicBuilder {
    pub fn new(client_id: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            access_key: access_key.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Outbound topic: `Altizon/Datonis/{client_id}/{suffix}`
    pub fn outbound(&self, suffix: &str) -> String {
        format!("{TOPIC_ROOT}/{}/{suffix}", self.client_id)
    }

    /// Acknowledgement topic: `Altizon/Datonis/{client_id}/httpAck`
    pub fn ack(&self) -> String {
        self.outbound(ACK_SUFFIX)
    }

    /// Instruction topic: `Altizon/Datonis/{access_key}/thing/{thing_key}/executeInstruction`
    pub fn instruction(&self, thing_key: &str) -> String {
        format!(
            "{TOPIC_ROOT}/{}/thing/{thing_key}/{INSTRUCTION_SUFFIX}",
            self.access_key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_construction() {
        let topics = TopicBuilder::new("A1B2C3D4E5", "access-1");
        assert_eq!(topics.outbound("event"), "Altizon/Datonis/A1B2C3D4E5/event");
        assert_eq!(topics.ack(), "Altizon/Datonis/A1B2C3D4E5/httpAck");
        assert_eq!(
            topics.instruction("614a5ed34c"),
            "Altizon/Datonis/access-1/thing/614a5ed34c/executeInstruction"
        );
    }

    #[test]
    fn test_classify_topic() {
        assert_eq!(
            classify_topic("Altizon/Datonis/A1B2C3D4E5/httpAck"),
            TopicKind::Ack
        );
        assert_eq!(
            classify_topic("Altizon/Datonis/ak/thing/t1/executeInstruction"),
            TopicKind::Instruction
        );
        assert_eq!(
            classify_topic("Altizon/Datonis/A1B2C3D4E5/event"),
            TopicKind::Other
        );
    }

    #[test]
    fn test_builder_topics_classify_back() {
        let topics = TopicBuilder::new("CID", "AK");
        assert_eq!(classify_topic(&topics.ack()), TopicKind::Ack);
        assert_eq!(
            classify_topic(&topics.instruction("t")),
            TopicKind::Instruction
        );
    }
}
