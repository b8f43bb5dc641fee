/// Batched post-processing on a dedicated GPU context thread.
pub mod post;
