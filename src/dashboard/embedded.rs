use rust_embed::RustEmbed;

/// The dashboard UI, compiled into the binary.
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/ui/"]
pub struct Assets;
