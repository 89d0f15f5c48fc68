pub mod llm; // Text-generation backends, strict reply decoding
pub mod safety; // PII detection, masking, risk gating, audit
pub mod clinical; // Case model, encounter support
pub mod ensemble; // Multi-model diagnosis and synthesis
