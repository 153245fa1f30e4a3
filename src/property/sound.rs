use std::borrow::Cow;
use std::sync::Arc;

use crate::WzReader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WzSoundError {
    #[error("sound payload missing")]
    MissingPayload,

    #[error("not a Sound property")]
    NotSoundProperty,
}

/// Audio container, guessed from the body's magic bytes. The metadata
/// header is carried opaquely and never interpreted.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WzSoundType {
    #[default]
    Mpeg,
    Wav,
    Ogg,
}

impl WzSoundType {
    pub fn mime(&self) -> &'static str {
        match self {
            WzSoundType::Wav => "audio/wav",
            WzSoundType::Ogg => "audio/ogg",
            WzSoundType::Mpeg => "audio/mpeg",
        }
    }
}

pub fn get_sound_type_from_data(data: &[u8]) -> WzSoundType {
    if data.starts_with(b"RIFF") {
        WzSoundType::Wav
    } else if data.starts_with(b"OggS") {
        WzSoundType::Ogg
    } else {
        WzSoundType::Mpeg
    }
}

/// An audio payload: duration plus opaque header and body slices,
/// either referencing the source buffer or owned after an edit.
#[derive(Debug, Clone, Default)]
pub struct WzSound {
    reader: Option<Arc<WzReader>>,
    offset: usize,
    length: u32,
    header_offset: usize,
    header_size: usize,
    header_owned: Option<Vec<u8>>,
    data_owned: Option<Vec<u8>>,
    /// playback length in milliseconds
    pub duration: u32,
    pub sound_type: WzSoundType,
}

impl WzSound {
    pub fn new(
        reader: &Arc<WzReader>,
        offset: usize,
        length: u32,
        header_offset: usize,
        header_size: usize,
        duration: u32,
    ) -> Self {
        let sound_type =
            get_sound_type_from_data(&reader.get_ref_slice()[offset..offset + length as usize]);
        Self {
            reader: Some(Arc::clone(reader)),
            offset,
            length,
            header_offset,
            header_size,
            header_owned: None,
            data_owned: None,
            duration,
            sound_type,
        }
    }

    /// A sound born in the editor, from explicit header and body bytes.
    pub fn from_parts(header: Vec<u8>, data: Vec<u8>, duration: u32) -> Self {
        let sound_type = get_sound_type_from_data(&data);
        Self {
            reader: None,
            offset: 0,
            length: data.len() as u32,
            header_offset: 0,
            header_size: header.len(),
            header_owned: Some(header),
            data_owned: Some(data),
            duration,
            sound_type,
        }
    }

    pub fn data_len(&self) -> u32 {
        self.length
    }

    /// The opaque container-metadata header, kept for re-emit.
    pub fn header_bytes(&self) -> Cow<[u8]> {
        if let Some(header) = &self.header_owned {
            return Cow::Borrowed(header);
        }
        match &self.reader {
            Some(reader) => Cow::Borrowed(
                reader.get_slice(self.header_offset..self.header_offset + self.header_size),
            ),
            None => Cow::Borrowed(&[]),
        }
    }

    /// The raw audio body.
    pub fn body(&self) -> Cow<[u8]> {
        if let Some(data) = &self.data_owned {
            return Cow::Borrowed(data);
        }
        match &self.reader {
            Some(reader) => {
                Cow::Borrowed(reader.get_slice(self.offset..self.offset + self.length as usize))
            }
            None => Cow::Borrowed(&[]),
        }
    }

    /// The body plus its MIME guess, the shape hosts feed to an audio
    /// element.
    pub fn extract(&self) -> (Vec<u8>, &'static str) {
        (self.body().into_owned(), self.sound_type.mime())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_magic_dispatch() {
        assert_eq!(get_sound_type_from_data(b"RIFF....WAVE"), WzSoundType::Wav);
        assert_eq!(get_sound_type_from_data(b"OggS\0\0"), WzSoundType::Ogg);
        assert_eq!(get_sound_type_from_data(&[0xFF, 0xFB, 0x90, 0x00]), WzSoundType::Mpeg);
        assert_eq!(get_sound_type_from_data(&[]), WzSoundType::Mpeg);
    }

    #[test]
    fn test_from_parts() {
        let header = vec![0u8; 52];
        let data = b"OggS body".to_vec();
        let sound = WzSound::from_parts(header.clone(), data.clone(), 1500);

        assert_eq!(sound.duration, 1500);
        assert_eq!(sound.header_bytes().as_ref(), header.as_slice());

        let (body, mime) = sound.extract();
        assert_eq!(body, data);
        assert_eq!(mime, "audio/ogg");
    }
}
