pub mod conversations;

pub use conversations::{
    ConversationEntity, ConversationStore, ConversationStoreError, InMemoryConversationStore,
    Message, OneOrMany, TripRecord,
};
