use std::{io, path::Path};

use tokenizers::{
    models::wordpiece::WordPiece, normalizers::BertNormalizer,
    pre_tokenizers::bert::BertPreTokenizer,
};

use crate::error::{OrchestraErr, Result};

/// Token used for words missing from the vocabulary.
pub const UNK_TOKEN: &str = "[UNK]";

/// Maps text to token ids.
pub trait Tokenizer {
    /// # Errors
    /// Returns `OrchestraErr::Tokenizer` if the text can't be encoded.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn vocab_size(&self) -> usize;
}

/// BERT-style WordPiece tokenizer: punctuation is split off, unknown words are broken into
/// `##` sub-words and whatever is still missing maps to `[UNK]`.
#[derive(Debug, Clone)]
pub struct WordPieceTokenizer {
    inner: tokenizers::Tokenizer,
}

impl WordPieceTokenizer {
    /// Loads a WordPiece vocabulary with one token per line; a token's id is its line number.
    ///
    /// # Arguments
    /// * `path` - The vocabulary file.
    /// * `lowercase` - Whether to lowercase (and strip accents from) the input text.
    ///
    /// # Errors
    /// Returns `Io` if the file can't be read, `Tokenizer` if it isn't a vocabulary and
    /// `InvalidConfig` if it has no `[UNK]` entry.
    pub fn from_path<P: AsRef<Path>>(path: P, lowercase: bool) -> Result<Self> {
        let model = WordPiece::from_file(&path.as_ref().to_string_lossy())
            .unk_token(UNK_TOKEN.to_string())
            .build()
            .map_err(backend_err)?;

        let mut inner = tokenizers::Tokenizer::new(model);
        inner
            .with_normalizer(Some(BertNormalizer::new(true, true, None, lowercase)))
            .with_pre_tokenizer(Some(BertPreTokenizer));

        if inner.token_to_id(UNK_TOKEN).is_none() {
            return Err(OrchestraErr::InvalidConfig(format!(
                "vocabulary has no {UNK_TOKEN} token"
            )));
        }

        Ok(Self { inner })
    }
}

impl Tokenizer for WordPieceTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self.inner.encode(text, false).map_err(backend_err)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

fn backend_err(e: tokenizers::Error) -> OrchestraErr {
    match e.downcast::<io::Error>() {
        Ok(e) => OrchestraErr::Io(*e),
        Err(e) => OrchestraErr::Tokenizer(e.to_string()),
    }
}
