//! Unit tests for the pure kernel components
//!
//! These run on the host (not the embedded target) to verify the
//! priority bitmap, the stable error codes and the configuration.

#[cfg(test)]
mod prio_tests {
    use ukernel::config::{CFG_LOWEST_PRIO, CFG_PRIO_COUNT};
    use ukernel::prio::PrioBitmap;

    #[test]
    fn test_empty_map() {
        let map = PrioBitmap::new();
        assert!(map.is_empty());
    }

    #[test]
    fn test_single_priority() {
        let mut map = PrioBitmap::new();

        map.insert(5);
        assert!(!map.is_empty());
        assert!(map.contains(5));
        assert!(!map.contains(4));
        assert_eq!(map.highest(), 5);

        map.remove(5);
        assert!(map.is_empty());
    }

    #[test]
    fn test_multiple_priorities() {
        let mut map = PrioBitmap::new();

        // Insert in random order
        map.insert(20);
        map.insert(5);
        map.insert(10);
        map.insert(0);
        map.insert(15);

        assert_eq!(map.highest(), 0);

        map.remove(0);
        assert_eq!(map.highest(), 5);

        map.remove(5);
        assert_eq!(map.highest(), 10);

        map.remove(10);
        assert_eq!(map.highest(), 15);

        map.remove(15);
        assert_eq!(map.highest(), 20);

        map.remove(20);
        assert!(map.is_empty());
    }

    #[test]
    fn test_group_boundaries() {
        let mut map = PrioBitmap::new();

        // Around the group-of-eight boundaries (7, 8, 9)
        map.insert(7);
        assert_eq!(map.highest(), 7);

        map.insert(8);
        assert_eq!(map.highest(), 7);

        map.remove(7);
        assert_eq!(map.highest(), 8);

        map.insert(0);
        assert_eq!(map.highest(), 0);

        map.insert(CFG_LOWEST_PRIO as u8);
        map.remove(0);
        map.remove(8);
        assert_eq!(map.highest(), CFG_LOWEST_PRIO as u8);
    }

    #[test]
    fn test_all_priorities() {
        let mut map = PrioBitmap::new();

        for p in 0..CFG_PRIO_COUNT {
            map.insert(p as u8);
        }
        assert_eq!(map.highest(), 0);

        for p in 0..CFG_PRIO_COUNT {
            assert_eq!(map.highest(), p as u8);
            map.remove(p as u8);
        }
        assert!(map.is_empty());
    }

    #[test]
    fn test_snapshot_reflects_membership() {
        let mut map = PrioBitmap::new();
        map.insert(0);
        map.insert(9);

        let (grp, tbl) = map.snapshot();
        assert_eq!(grp, 0x03);
        assert_eq!(tbl[0], 0x01);
        assert_eq!(tbl[1], 0x02);
    }
}

#[cfg(test)]
mod error_tests {
    use ukernel::error::OsError;

    #[test]
    fn test_stable_error_codes() {
        // Callers depend on these exact values
        assert_eq!(OsError::EventType.code(), 1);
        assert_eq!(OsError::PendIsr.code(), 2);
        assert_eq!(OsError::PostNullPtr.code(), 3);
        assert_eq!(OsError::EventNull.code(), 4);
        assert_eq!(OsError::InvalidOpt.code(), 7);
        assert_eq!(OsError::TaskWaiting.code(), 8);
        assert_eq!(OsError::Timeout.code(), 10);
        assert_eq!(OsError::QFull.code(), 30);
        assert_eq!(OsError::SemOvf.code(), 50);
        assert_eq!(OsError::NoMoreTcb.code(), 70);
        assert_eq!(OsError::MemInvalidPart.code(), 110);
        assert_eq!(OsError::MemInvalidBlks.code(), 111);
        assert_eq!(OsError::MemInvalidSize.code(), 112);
        assert_eq!(OsError::MemNoFreeBlks.code(), 113);
        assert_eq!(OsError::MemFull.code(), 114);
        assert_eq!(OsError::MemInvalidPblk.code(), 115);
        assert_eq!(OsError::MemInvalidPmem.code(), 116);
        assert_eq!(OsError::MemInvalidPdata.code(), 117);
        assert_eq!(OsError::MemInvalidAddr.code(), 118);
        assert_eq!(OsError::DelIsr.code(), 140);
        assert_eq!(OsError::CreateIsr.code(), 141);
    }

    #[test]
    fn test_error_debug() {
        // Errors must be debuggable
        let err = OsError::PendIsr;
        let _ = format!("{:?}", err);
        assert_ne!(OsError::Timeout, OsError::QFull);
    }
}

#[cfg(test)]
mod types_tests {
    use ukernel::types::{opt, stat};

    #[test]
    fn test_status_bits_are_disjoint() {
        let bits = [stat::SEM, stat::MBOX, stat::Q, stat::SUSPEND, stat::MUTEX, stat::FLAG];
        for (i, a) in bits.iter().enumerate() {
            for b in bits.iter().skip(i + 1) {
                assert_eq!(a & b, 0);
            }
        }
        assert_eq!(stat::RDY, 0);
    }

    #[test]
    fn test_post_option_flags() {
        assert_eq!(opt::POST_OPT_NONE, 0x00);
        assert_eq!(opt::POST_OPT_BROADCAST, 0x01);
        assert_eq!(opt::POST_OPT_FRONT, 0x02);

        let combined = opt::POST_OPT_FRONT | opt::POST_OPT_BROADCAST;
        assert_ne!(combined & opt::POST_OPT_FRONT, 0);
        assert_ne!(combined & opt::POST_OPT_BROADCAST, 0);
    }

    #[test]
    fn test_delete_option_flags() {
        assert_eq!(opt::DEL_NO_PEND, 0x00);
        assert_eq!(opt::DEL_ALWAYS, 0x01);
    }
}

#[cfg(test)]
mod config_tests {
    use ukernel::config::*;

    #[test]
    fn test_config_values() {
        assert!(CFG_PRIO_COUNT >= 8, "need at least 8 priority levels");
        assert!(CFG_PRIO_COUNT <= 256, "too many priority levels");
        assert_eq!(CFG_PRIO_COUNT % 8, 0, "bitmap groups cover 8 priorities");

        assert!(CFG_TICKS_PER_SEC >= 10, "tick rate too slow");
        assert!(CFG_TICKS_PER_SEC <= 10000, "tick rate too fast");

        assert!(CFG_STK_SIZE_MIN >= 32, "stack minimum too small");

        // Reserved priorities sit at the bottom
        assert_eq!(CFG_PRIO_IDLE, (CFG_PRIO_COUNT - 1) as u8);
        assert_eq!(CFG_PRIO_STAT, CFG_PRIO_IDLE - 1);

        assert!(CFG_TCB_COUNT >= CFG_MAX_TASKS + 2, "room for idle and stat tasks");
    }

    #[test]
    fn test_version() {
        assert_eq!(ukernel::os_version(), OS_VERSION);
        assert!(ukernel::os_version() >= 100);
    }
}
