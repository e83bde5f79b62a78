use std::fmt;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

handle!(
    /// Sampled color buffer owned by a backend.
    TextureId
);
handle!(
    /// Attachment object that routes draws into a [`TextureId`].
    FramebufferId
);
handle!(
    /// Vertex data buffer.
    BufferId
);
handle!(
    /// Linked vertex + fragment program.
    ProgramId
);

/// Resolved vertex attribute slot inside a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeLocation(pub u32);

/// Resolved uniform slot inside a program.
///
/// Only meaningful for the program it was resolved against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Backing storage of an attachable render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTargetStorage {
    pub texture: TextureId,
    pub framebuffer: FramebufferId,
}

/// Sampling filter used for static lookup textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFilter {
    Linear,
    Nearest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendMode {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendMode {
    /// Source overwrites destination.
    pub const REPLACE: BlendMode = BlendMode {
        src: BlendFactor::One,
        dst: BlendFactor::Zero,
    };
}

impl Default for BlendMode {
    fn default() -> Self {
        Self::REPLACE
    }
}

pub const OPAQUE_BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Decoded RGBA8 image used for the area and search tables.
#[derive(Clone, PartialEq, Eq)]
pub struct LookupImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl LookupImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Single opaque white texel, handy for fakes.
    pub fn placeholder() -> Self {
        Self::new(1, 1, vec![255, 255, 255, 255])
    }

    pub fn is_consistent(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

impl fmt::Debug for LookupImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// GPU adapter preference, mirrored onto `wgpu::PowerPreference`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GpuPowerPreference {
    #[default]
    Low,
    High,
}

impl fmt::Display for GpuPowerPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuPowerPreference::Low => f.write_str("low"),
            GpuPowerPreference::High => f.write_str("high"),
        }
    }
}

/// Which intermediate result lands on the display.
///
/// `Final` is the normal antialiased output; the other views are inspection aids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
pub enum DebugView {
    #[default]
    Final,
    Scene,
    Edges,
    Weights,
}

impl DebugView {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "final" | "blend" | "off" => Some(DebugView::Final),
            "scene" | "source" => Some(DebugView::Scene),
            "edges" | "edge" => Some(DebugView::Edges),
            "weights" | "weight" => Some(DebugView::Weights),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DebugView::Final => "final",
            DebugView::Scene => "scene",
            DebugView::Edges => "edges",
            DebugView::Weights => "weights",
        }
    }
}

impl fmt::Display for DebugView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-frame mode selection passed explicitly into the frame loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSettings {
    pub aa_enabled: bool,
    pub view: DebugView,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            aa_enabled: true,
            view: DebugView::Final,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_view_parses_aliases() {
        assert_eq!(DebugView::parse("Edges"), Some(DebugView::Edges));
        assert_eq!(DebugView::parse(" blend "), Some(DebugView::Final));
        assert_eq!(DebugView::parse("source"), Some(DebugView::Scene));
        assert_eq!(DebugView::parse("wobble"), None);
    }

    #[test]
    fn lookup_image_consistency_checks_byte_length() {
        assert!(LookupImage::placeholder().is_consistent());
        assert!(!LookupImage::new(2, 2, vec![0; 4]).is_consistent());
        assert!(!LookupImage::new(0, 1, Vec::new()).is_consistent());
    }
}
