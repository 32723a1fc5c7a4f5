use ffmpeg_next::Rational;

/// One compressed packet read from the demuxer, tagged with the time base of
/// the stream it belongs to.
#[derive(Clone)]
pub struct RawPacket {
    packet: ffmpeg_next::codec::packet::Packet,
    time_base: Rational,
}

impl RawPacket {
    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn size(&self) -> usize {
        self.packet.size()
    }

    /// Index of the source stream this packet was demuxed from.
    pub fn index(&self) -> usize {
        self.packet.stream()
    }

    /// Presentation time in seconds, if the packet carries one.
    pub fn pts_seconds(&self) -> Option<f64> {
        self.pts().map(|pts| ts_to_seconds(pts, self.time_base))
    }

    /// Get a reference to the inner packet (for decoder calls).
    pub fn packet(&self) -> &ffmpeg_next::codec::packet::Packet {
        &self.packet
    }
}

impl From<(ffmpeg_next::codec::packet::Packet, Rational)> for RawPacket {
    fn from((packet, time_base): (ffmpeg_next::codec::packet::Packet, Rational)) -> Self {
        Self { packet, time_base }
    }
}

/// Converts a timestamp in `time_base` units into seconds. A zero denominator
/// yields 0.0 rather than infinity.
pub fn ts_to_seconds(ts: i64, time_base: Rational) -> f64 {
    if time_base.denominator() == 0 {
        return 0.0;
    }
    ts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}
