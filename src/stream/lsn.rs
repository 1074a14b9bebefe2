// WAL locations as exchanged with Postgres ("X/Y" hexadecimal text).

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Parse a Postgres LSN string (e.g., "0/16B6C50") into an Lsn
    pub fn from_pg_string(s: &str) -> Option<Self> {
        let (hi, lo) = s.trim().split_once('/')?;
        let hi = u64::from_str_radix(hi, 16).ok()?;
        let lo = u64::from_str_radix(lo, 16).ok()?;
        if hi > u32::MAX as u64 || lo > u32::MAX as u64 {
            return None;
        }
        Some(Lsn((hi << 32) | lo))
    }

    /// Convert this Lsn to a Postgres LSN string (e.g., "0/16B6C50")
    pub fn to_pg_string(&self) -> String {
        format!("{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFFFFFF)
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_pg_string())
    }
}

impl From<u64> for Lsn {
    fn from(val: u64) -> Self {
        Lsn(val)
    }
}
