//! Shaders for virtex sparse texture streaming.
//!
//! GLSL sources live in `shaders/` and are compiled to SPIR-V at build time
//! with shaderc. The program draws the sparse texture as a full-screen quad,
//! marking non-resident pages in yellow.

use std::sync::OnceLock;

static FULLSCREEN_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/fullscreen_vert.spv"));
static SPARSE_FETCH_FRAG: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/sparse_fetch_frag.spv"));

/// Re-pack embedded bytes as words; `include_bytes!` gives no alignment.
fn words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect()
}

/// Vertex shader emitting a full-screen triangle strip from the vertex index.
pub fn fullscreen_vertex_shader() -> &'static [u32] {
    static CODE: OnceLock<Vec<u32>> = OnceLock::new();
    CODE.get_or_init(|| words(FULLSCREEN_VERT))
}

/// Fragment shader fetching texels with residency feedback.
pub fn sparse_fetch_fragment_shader() -> &'static [u32] {
    static CODE: OnceLock<Vec<u32>> = OnceLock::new();
    CODE.get_or_init(|| words(SPARSE_FETCH_FRAG))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn embedded_code_is_whole_words() {
        assert_eq!(FULLSCREEN_VERT.len() % 4, 0);
        assert_eq!(SPARSE_FETCH_FRAG.len() % 4, 0);
    }

    #[test]
    fn shaders_start_with_magic() {
        assert_eq!(fullscreen_vertex_shader()[0], SPIRV_MAGIC);
        assert_eq!(sparse_fetch_fragment_shader()[0], SPIRV_MAGIC);
    }
}
