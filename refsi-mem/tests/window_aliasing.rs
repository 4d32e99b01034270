use refsi_addr::UnitId;
use refsi_mem::{MemoryController, RamDevice, WindowConfig, WindowMode};

/// §8 scenario 4: a `PerHart` window lets every hart see the same virtual
/// offset but land on a different physical stripe of the target device, and
/// a non-hart unit can't resolve the window at all.
#[test]
fn per_hart_window_isolates_harts_at_the_configured_stride() {
    let mut ctl = MemoryController::new();
    ctl.add(0x103E_0000, Box::new(RamDevice::new(0x10000))).unwrap();

    let handle = ctl.create_window();
    ctl.write_window_config(
        handle,
        WindowConfig {
            active: true,
            mode: WindowMode::PerHart,
            base: 0x1400_0000,
            target: 0x103E_0000,
            size: 0x8000,
            scale: 0x8000,
        },
    )
    .unwrap();

    assert!(ctl.store(0x1400_0010, 1, &[0x11], UnitId::AccHart(0)));
    assert!(ctl.store(0x1400_0010, 1, &[0x22], UnitId::AccHart(1)));

    let mut out = [0u8; 1];
    assert!(ctl.load(0x103E_0010, 1, &mut out, UnitId::External));
    assert_eq!(out, [0x11]);
    assert!(ctl.load(0x103E_8010, 1, &mut out, UnitId::External));
    assert_eq!(out, [0x22]);

    assert!(!ctl.load(0x1400_0010, 1, &mut out, UnitId::External));
}
