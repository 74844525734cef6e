use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::error::{Error, Result};
use crate::traits::TokenCounter;

/// `cl100k_base` BPE, the encoding GPT-4 class models budget their context with.
#[derive(Clone)]
pub struct Cl100kTokenizer {
    bpe: Arc<CoreBPE>,
}

impl Cl100kTokenizer {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::Operation(format!("Failed to load cl100k_base tokenizer: {e}")))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenCounter for Cl100kTokenizer {
    fn name(&self) -> &str {
        "cl100k_base"
    }

    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_ordinary(text).into_iter().map(|t| t as u32).collect()
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.bpe
            .decode(tokens.iter().map(|&t| t as _).collect())
            .map_err(|e| Error::InvalidInput(format!("token window is not valid UTF-8: {e}")))
    }
}
