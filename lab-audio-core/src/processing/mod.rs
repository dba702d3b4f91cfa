pub mod audio_clip;
pub mod conversion;
pub mod recording_buffer;
