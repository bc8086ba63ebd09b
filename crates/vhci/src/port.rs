//! Free port lookup from the VHCI status listing
//!
//! The listing starts with one header line followed by one row per port.
//! Older kernels print `port sta spd ...`; newer ones prefix each row with the
//! root hub kind: `hub port sta spd dev sockfd local_busid`, e.g.
//!
//! ```text
//! hub port sta spd dev      sockfd local_busid
//! hs  0000 006 002 00010002 000003 1-1
//! hs  0001 004 000 00000000 000000 0-0
//! ss  0008 004 000 00000000 000000 0-0
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{DeviceSpeed, HubKind};
use crate::error::{Result, VhciError};

/// One parsed row of the status listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRecord {
    /// Root hub kind, when the kernel prints it
    pub hub: Option<HubKind>,
    pub port: u32,
    pub status: u32,
}

impl PortRecord {
    /// Whether a device of `speed` may use this port
    fn accepts(&self, speed: DeviceSpeed) -> bool {
        self.hub.is_none_or(|hub| hub == speed.hub())
    }
}

/// Parse a single status row; trailing fields are ignored
pub fn parse_row(line: &str) -> Option<PortRecord> {
    let mut fields = line.split_whitespace().peekable();
    let hub = match fields.peek().copied().and_then(HubKind::from_token) {
        Some(hub) => {
            fields.next();
            Some(hub)
        }
        None => None,
    };
    let port = fields.next()?.parse().ok()?;
    let status = fields.next()?.parse().ok()?;
    Some(PortRecord { hub, port, status })
}

/// Find the first free port in a status listing
///
/// Exactly one header line is skipped. Rows are scanned in order and the
/// first row with `free_status` that suits `speed` wins.
pub fn find_free_port_in<R: BufRead>(
    reader: R,
    free_status: u32,
    speed: DeviceSpeed,
    source: &Path,
) -> Result<u32> {
    let read_error = |e| VhciError::StatusUnavailable {
        path: source.to_path_buf(),
        source: e,
    };

    // rows are decoded lossily; one bad byte must not end the scan
    let mut lines = reader.split(b'\n');
    if lines.next().transpose().map_err(read_error)?.is_none() {
        return Err(VhciError::NoFreePort);
    }

    for raw in lines {
        let raw = raw.map_err(read_error)?;
        let line = String::from_utf8_lossy(&raw);
        if line.trim().is_empty() {
            continue;
        }
        let Some(record) = parse_row(&line) else {
            warn!("Skipping malformed VHCI status row: {:?}", line);
            continue;
        };
        if record.status != free_status {
            debug!("VHCI port {} busy (status {})", record.port, record.status);
        } else if !record.accepts(speed) {
            debug!(
                "VHCI port {} free but on {:?} hub, device needs {:?}",
                record.port,
                record.hub,
                speed.hub()
            );
        } else {
            return Ok(record.port);
        }
    }

    Err(VhciError::NoFreePort)
}

/// Find the first free port of the driver rooted at `control_root`
pub fn find_free_port(control_root: &Path, free_status: u32, speed: DeviceSpeed) -> Result<u32> {
    let path = control_root.join("status");
    let file = File::open(&path).map_err(|e| VhciError::StatusUnavailable {
        path: path.clone(),
        source: e,
    })?;

    let port = find_free_port_in(BufReader::new(file), free_status, speed, &path)?;
    info!("Using VHCI port {}", port);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn scan(listing: &str) -> Result<u32> {
        find_free_port_in(
            Cursor::new(listing),
            4,
            DeviceSpeed::Full,
            Path::new("status"),
        )
    }

    #[test]
    fn test_first_free_port_wins() {
        assert_eq!(scan("header\n1 0\n2 4\n3 4\n").unwrap(), 2);
    }

    #[test]
    fn test_no_free_port() {
        let err = scan("header\n1 0\n2 6\n3 1\n").unwrap_err();
        assert!(matches!(err, VhciError::NoFreePort));
    }

    #[test]
    fn test_empty_listing() {
        assert!(matches!(scan("").unwrap_err(), VhciError::NoFreePort));
        assert!(matches!(scan("header\n").unwrap_err(), VhciError::NoFreePort));
    }

    #[test]
    fn test_header_skipped_even_if_it_looks_like_a_row() {
        assert_eq!(scan("0 4\n5 4\n").unwrap(), 5);
    }

    #[test]
    fn test_trailing_fields_ignored() {
        let listing = "prt sta spd bus dev socket local_busid\n\
                       000 006 002 001 002 3 1-1\n\
                       001 004 000 000 000 0 0-0\n";
        assert_eq!(scan(listing).unwrap(), 1);
    }

    #[test]
    fn test_hub_prefixed_rows() {
        let listing = "hub port sta spd dev      sockfd local_busid\n\
                       hs  0000 006 002 00010002 000003 1-1\n\
                       hs  0001 004 000 00000000 000000 0-0\n\
                       ss  0008 004 000 00000000 000000 0-0\n";
        assert_eq!(scan(listing).unwrap(), 1);

        let super_speed = find_free_port_in(
            Cursor::new(listing),
            4,
            DeviceSpeed::Super,
            Path::new("status"),
        )
        .unwrap();
        assert_eq!(super_speed, 8);
    }

    #[test]
    fn test_full_speed_skips_superspeed_hub() {
        let listing = "hub port sta\nss 0008 004\nss 0009 004\n";
        assert!(matches!(scan(listing).unwrap_err(), VhciError::NoFreePort));
    }

    #[test]
    fn test_malformed_rows_skipped() {
        assert_eq!(scan("header\n\ngarbage here\n7\n8 4\n").unwrap(), 8);
    }

    #[test]
    fn test_invalid_utf8_header_and_row_skipped() {
        let listing: &[u8] = b"\xff\xfeheader\n\xff\xfe 1 0\n1 \xc3\n2 4\n";
        let port = find_free_port_in(listing, 4, DeviceSpeed::Full, Path::new("status")).unwrap();
        assert_eq!(port, 2);
    }

    #[test]
    fn test_mismatched_hub_is_not_selected() {
        let listing = "hub port sta\nss 0008 004\nhs 0001 006\nhs 0002 004\n";
        assert_eq!(scan(listing).unwrap(), 2);
    }

    #[test]
    fn test_parse_row() {
        assert_eq!(
            parse_row("hs  0003 004 000 00000000 000000 0-0"),
            Some(PortRecord {
                hub: Some(HubKind::HighSpeed),
                port: 3,
                status: 4
            })
        );
        assert_eq!(
            parse_row("2 6"),
            Some(PortRecord {
                hub: None,
                port: 2,
                status: 6
            })
        );
        assert_eq!(parse_row("xx 1 2"), None);
        assert_eq!(parse_row("1"), None);
    }

    #[test]
    fn test_missing_status_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_free_port(dir.path(), 4, DeviceSpeed::Full).unwrap_err();
        assert!(matches!(err, VhciError::StatusUnavailable { .. }));
    }

    #[test]
    fn test_status_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("status"), "header\n1 0\n2 4\n3 4\n").unwrap();
        assert_eq!(find_free_port(dir.path(), 4, DeviceSpeed::Full).unwrap(), 2);
    }

    proptest! {
        #[test]
        fn prop_returns_first_row_with_free_status(
            header in "[a-z ]{0,20}",
            rows in prop::collection::vec((0u32..64, 0u32..8), 0..16),
        ) {
            let mut listing = format!("{header}\n");
            for (port, status) in &rows {
                listing.push_str(&format!("{port} {status} 000 0-0\n"));
            }

            let expected = rows.iter().find(|(_, status)| *status == 4).map(|(port, _)| *port);
            match (scan(&listing), expected) {
                (Ok(port), Some(want)) => prop_assert_eq!(port, want),
                (Err(VhciError::NoFreePort), None) => {}
                (got, want) => prop_assert!(false, "got {:?}, expected {:?}", got, want),
            }
        }
    }
}
