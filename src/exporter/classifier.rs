//! Media path classification of BigBlueButton channels

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// `presence_data` set by the WebRTC SFU when it bridges a user's audio
pub const SFU_PRESENCE_DATA: &str = "from_bbb-webrtc-sfu";

static BBB_USER: LazyLock<Regex> = LazyLock::new(|| compile(r".*-bbbID-.*"));
static GLOBAL_AUDIO: LazyLock<Regex> = LazyLock::new(|| compile(r"^GLOBAL_AUDIO_\d+$"));
static LISTEN_ONLY: LazyLock<Regex> = LazyLock::new(|| compile(r".*-bbbID-LISTENONLY-.*"));

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => panic!("invalid built-in pattern {pattern}: {e}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelCategory {
    /// User audio bridged through the WebRTC SFU
    SfuSendRecv,
    /// User audio negotiated directly with FreeSWITCH
    FsSendRecv,
    /// The SFU's listen-only mix for a conference
    SfuGlobalAudio,
    FsRecvOnly,
    /// Anything not recognisably BigBlueButton (dial-in, SIP trunks)
    External,
}

impl ChannelCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelCategory::SfuSendRecv => "sfu-sendrecv",
            ChannelCategory::FsSendRecv => "fs-sendrecv",
            ChannelCategory::SfuGlobalAudio => "sfu-global-audio",
            ChannelCategory::FsRecvOnly => "fs-recvonly",
            ChannelCategory::External => "external",
        }
    }
}

impl fmt::Display for ChannelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a channel from its caller id number and presence data.
///
/// A listen-only caller id also carries the generic user marker, so it is
/// told apart inside the user branch before the send/receive dispatch.
pub fn classify(cid_num: &str, presence_data: &str) -> ChannelCategory {
    if BBB_USER.is_match(cid_num) {
        if LISTEN_ONLY.is_match(cid_num) {
            ChannelCategory::FsRecvOnly
        } else if presence_data == SFU_PRESENCE_DATA {
            ChannelCategory::SfuSendRecv
        } else {
            ChannelCategory::FsSendRecv
        }
    } else if GLOBAL_AUDIO.is_match(cid_num) {
        ChannelCategory::SfuGlobalAudio
    } else {
        ChannelCategory::External
    }
}
