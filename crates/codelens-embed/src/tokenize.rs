use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::{EncodeInput, Tokenizer};

const PAD_ID: u32 = 1;

/// Encode a single text, truncated/padded to `max_len`.
pub fn tokenize_on_device(tokenizer: &Tokenizer, text: &str, max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    encode(tokenizer, text.into(), max_len, device)
}

/// Encode a `(query, passage)` pair the way cross-encoders expect.
pub fn tokenize_pair_on_device(tokenizer: &Tokenizer, query: &str, passage: &str, max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    encode(tokenizer, (query, passage).into(), max_len, device)
}

fn encode(tokenizer: &Tokenizer, input: EncodeInput<'_>, max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    let enc = tokenizer.encode(input, true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let mut ids = enc.get_ids().to_vec();
    let mut mask = enc.get_attention_mask().to_vec();
    if ids.len() > max_len { ids.truncate(max_len); mask.truncate(max_len); }
    if ids.len() < max_len { let pad = max_len - ids.len(); ids.extend(std::iter::repeat(PAD_ID).take(pad)); mask.extend(std::iter::repeat(0).take(pad)); }
    let input_ids = Tensor::from_iter(ids, device)?.reshape((1, max_len))?;
    let attention_mask = Tensor::from_iter(mask, device)?.reshape((1, max_len))?;
    Ok((input_ids, attention_mask))
}
