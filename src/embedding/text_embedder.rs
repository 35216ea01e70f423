//! The embedding backend seam shared by the general and biomedical strategies.

use async_trait::async_trait;

use crate::error::Result;
use crate::vector::Vector;

/// Turns chunk or query text into a fixed-width vector.
///
/// A backend must return the same vector for the same text across calls and
/// processes, and every vector must have exactly
/// [`TextEmbedder::dimension`] components. Index builds and queries rely on
/// both: a chunk embedded at build time is found again by embedding its own
/// text at query time.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use filingscope::embedding::TextEmbedder;
/// use filingscope::error::Result;
/// use filingscope::vector::Vector;
///
/// struct ConstantEmbedder {
///     dimension: usize,
/// }
///
/// #[async_trait]
/// impl TextEmbedder for ConstantEmbedder {
///     async fn embed(&self, _text: &str) -> Result<Vector> {
///         Ok(Vector::new(vec![1.0; self.dimension]))
///     }
///
///     fn dimension(&self) -> usize {
///         self.dimension
///     }
/// }
/// ```
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vector>;

    /// Embeds a batch, one vector per input in input order.
    ///
    /// Remote backends override this to send one request per batch.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vector>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize;

    /// Backend label used in log lines and debug output.
    fn name(&self) -> &str {
        "unknown"
    }
}
