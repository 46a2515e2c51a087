//! Router codec profile.
//!
//! Every room router is created with a single audio capability: Opus at
//! 48 kHz stereo with in-band FEC. Clients that cannot speak this set
//! simply fail `consume` with `incompatible-codecs`; the codec set never
//! changes after the router exists.

use mediasoup::prelude::*;
use std::num::{NonZeroU32, NonZeroU8};

/// The audio-only codec set used by every room router.
pub fn media_codecs() -> Vec<RtpCodecCapability> {
    vec![RtpCodecCapability::Audio {
        mime_type: MimeTypeAudio::Opus,
        preferred_payload_type: None,
        clock_rate: NonZeroU32::new(48_000).unwrap(),
        channels: NonZeroU8::new(2).unwrap(),
        parameters: RtpCodecParametersParameters::from([
            ("useinbandfec", 1_u32.into()),
            ("stereo", 1_u32.into()),
        ]),
        rtcp_feedback: vec![RtcpFeedback::TransportCc],
    }]
}
