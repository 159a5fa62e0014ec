//! HLS packaging: master playlist assembly and ffmpeg orchestration.

mod packager;
mod playlist;

pub use packager::{
    AdaptiveOutput, AdaptiveVariant, PlaylistPackager, ProgressEvent, SingleRenditionOutput,
};
pub use playlist::{parse_bitrate, MasterPlaylist, MediaGroupEntry, VariantStream};
