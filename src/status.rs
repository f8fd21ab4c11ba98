//! Tuner status snapshots parsed from device variables.

/// Signal strength at or above which a signal is considered present.
pub const SIGNAL_PRESENT_THRESHOLD: u32 = 45;

/// Snapshot of `/tunerN/status` or `/oob/status`.
///
/// A fresh value is produced by every query; nothing is cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunerStatus {
    /// Channel as reported by the device (`ch=`).
    pub channel: String,
    /// Lock modulation (`lock=`), `none` when unlocked.
    pub lock_str: String,
    /// Signal strength is above the presence threshold.
    pub signal_present: bool,
    /// The device locked using a supported modulation.
    pub lock_supported: bool,
    /// The device locked onto a modulation it cannot decode (reported in parentheses).
    pub lock_unsupported: bool,
    /// Signal strength percentage (`ss=`).
    pub signal_strength: u32,
    /// Signal to noise quality percentage (`snq=`).
    pub signal_to_noise_quality: u32,
    /// Symbol error quality percentage (`seq=`).
    pub symbol_error_quality: u32,
    /// Raw bits per second (`bps=`).
    pub raw_bits_per_second: u32,
    /// Packets per second (`pps=`).
    pub packets_per_second: u32,
}

impl TunerStatus {
    /// Parse a status string such as
    /// `ch=8vsb:503000000 lock=8vsb ss=100 snq=88 seq=100 bps=19394080 pps=0`.
    ///
    /// Missing fields default to empty or zero.
    pub fn parse(s: &str) -> Self {
        let mut status = TunerStatus::default();

        for (key, value) in fields(s) {
            match key {
                "ch" => status.channel = value.to_string(),
                "lock" => status.lock_str = value.to_string(),
                "ss" => status.signal_strength = parse_number(value),
                "snq" => status.signal_to_noise_quality = parse_number(value),
                "seq" => status.symbol_error_quality = parse_number(value),
                "bps" => status.raw_bits_per_second = parse_number(value),
                "pps" => status.packets_per_second = parse_number(value),
                _ => {}
            }
        }

        status.signal_present = status.signal_strength >= SIGNAL_PRESENT_THRESHOLD;
        if !status.lock_str.is_empty() && status.lock_str != "none" {
            if status.lock_str.starts_with('(') {
                status.lock_unsupported = true;
            } else {
                status.lock_supported = true;
            }
        }

        status
    }

    /// Check if the lock state is definitive, either way.
    pub fn lock_is_definitive(&self) -> bool {
        self.lock_supported || self.lock_unsupported
    }
}

/// Snapshot of `/tunerN/vstatus` for virtual-channel capable tuners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunerVStatus {
    /// Virtual channel (`vch=`).
    pub vchannel: String,
    /// Station name (`name=`).
    pub name: String,
    /// Authorization state (`auth=`).
    pub auth: String,
    /// Copy control information (`cci=`).
    pub cci: String,
    /// Copy generation management (`cgms=`).
    pub cgms: String,
    /// The subscription does not include this channel.
    pub not_subscribed: bool,
    /// The channel cannot be authorized right now.
    pub not_available: bool,
    /// The content is copy protected.
    pub copy_protected: bool,
}

impl TunerVStatus {
    /// Parse a vstatus string such as `vch=702 name=KTVU auth=subscribed cci=unrestricted`.
    pub fn parse(s: &str) -> Self {
        let mut status = TunerVStatus::default();

        for (key, value) in fields(s) {
            match key {
                "vch" => status.vchannel = value.to_string(),
                "name" => status.name = value.to_string(),
                "auth" => status.auth = value.to_string(),
                "cci" => status.cci = value.to_string(),
                "cgms" => status.cgms = value.to_string(),
                _ => {}
            }
        }

        status.not_subscribed = status.auth.starts_with("not-subscribed");
        status.not_available = status.auth.starts_with("error") || status.auth.starts_with("dialog");
        status.copy_protected =
            status.cci.starts_with("protected") || status.cgms.starts_with("protected");

        status
    }
}

/// One constellation sample from a plotsample variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotSample {
    /// In-phase component, 12-bit signed.
    pub real: i16,
    /// Quadrature component, 12-bit signed.
    pub imag: i16,
}

impl PlotSample {
    /// Parse whitespace separated hex words, each packing two 12-bit values.
    ///
    /// Parsing stops at the first token that is not hex.
    pub fn parse_list(s: &str) -> Vec<PlotSample> {
        s.split_whitespace()
            .map_while(|token| u32::from_str_radix(token, 16).ok())
            .map(|raw| PlotSample {
                real: sign_extend_12((raw >> 12) & 0x0FFF),
                imag: sign_extend_12(raw & 0x0FFF),
            })
            .collect()
    }
}

fn sign_extend_12(v: u32) -> i16 {
    let v = v as u16;
    if v & 0x0800 != 0 {
        (v | 0xF000) as i16
    } else {
        v as i16
    }
}

fn fields(s: &str) -> impl Iterator<Item = (&str, &str)> {
    s.split_whitespace().filter_map(|token| token.split_once('='))
}

pub(crate) fn parse_number(value: &str) -> u32 {
    let digits = value
        .find(|c: char| !c.is_ascii_digit())
        .map_or(value, |end| &value[..end]);
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locked_status() {
        let status = TunerStatus::parse(
            "ch=8vsb:503000000 lock=8vsb ss=100 snq=88 seq=100 bps=19394080 pps=1500",
        );
        assert_eq!(status.channel, "8vsb:503000000");
        assert_eq!(status.lock_str, "8vsb");
        assert!(status.signal_present);
        assert!(status.lock_supported);
        assert!(!status.lock_unsupported);
        assert_eq!(status.signal_strength, 100);
        assert_eq!(status.signal_to_noise_quality, 88);
        assert_eq!(status.symbol_error_quality, 100);
        assert_eq!(status.raw_bits_per_second, 19_394_080);
        assert_eq!(status.packets_per_second, 1500);
        assert!(status.lock_is_definitive());
    }

    #[test]
    fn test_parse_idle_status() {
        let status = TunerStatus::parse("ch=none lock=none ss=0 snq=0 seq=0 bps=0 pps=0");
        assert_eq!(status.channel, "none");
        assert!(!status.signal_present);
        assert!(!status.lock_supported);
        assert!(!status.lock_unsupported);
        assert!(!status.lock_is_definitive());
    }

    #[test]
    fn test_parse_unsupported_lock() {
        let status = TunerStatus::parse("ch=auto:57000000 lock=(ntsc) ss=60 snq=0 seq=0");
        assert!(status.signal_present);
        assert!(status.lock_unsupported);
        assert!(!status.lock_supported);
    }

    #[test]
    fn test_signal_threshold() {
        assert!(!TunerStatus::parse("ss=44").signal_present);
        assert!(TunerStatus::parse("ss=45").signal_present);
    }

    #[test]
    fn test_parse_empty_status() {
        assert_eq!(TunerStatus::parse(""), TunerStatus::default());
    }

    #[test]
    fn test_parse_vstatus() {
        let status = TunerVStatus::parse(
            "vch=702 name=KTVUDT auth=not-subscribed cci=protected cgms=unrestricted",
        );
        assert_eq!(status.vchannel, "702");
        assert_eq!(status.name, "KTVUDT");
        assert!(status.not_subscribed);
        assert!(!status.not_available);
        assert!(status.copy_protected);

        let status = TunerVStatus::parse("vch=5 auth=dialog cci=unrestricted cgms=unrestricted");
        assert!(status.not_available);
        assert!(!status.copy_protected);
    }

    #[test]
    fn test_parse_plotsample() {
        let samples = PlotSample::parse_list("001002 FFF7FF 800800");
        assert_eq!(
            samples,
            vec![
                PlotSample { real: 1, imag: 2 },
                PlotSample { real: -1, imag: 2047 },
                PlotSample { real: -2048, imag: -2048 },
            ]
        );
        assert!(PlotSample::parse_list("zz 001002").is_empty());
    }
}
