use refsi_addr::UnitId;
use refsi_dma::{
    DmaEngine, CTRL_DIM_2D, CTRL_START, REG_DMACTRL, REG_DMADSTADDR, REG_DMASRCADDR,
    REG_DMAXFERDSTSTRIDE0, REG_DMAXFERSIZE0, REG_DMAXFERSRCSTRIDE0,
};
use refsi_mem::{MemoryController, RamDevice};

fn write_reg(engine: &mut DmaEngine, ctl: &mut MemoryController, unit: UnitId, idx: usize, val: u64) {
    assert!(engine.store(ctl, unit, (idx as u64) * 8, 8, &val.to_le_bytes()));
}

#[test]
fn two_d_dma_copy_scatters_source_rows_into_contiguous_destination() {
    let mut ctl = MemoryController::new();
    ctl.add(0x1000, Box::new(RamDevice::new(0x200))).unwrap();
    ctl.add(0x2000, Box::new(RamDevice::new(0x200))).unwrap();

    let src: Vec<u8> = (0..128u8).collect();
    ctl.store(0x1000, 128, &src, UnitId::External);

    let mut engine = DmaEngine::new();
    let unit = UnitId::External;
    write_reg(&mut engine, &mut ctl, unit, REG_DMASRCADDR, 0x1000);
    write_reg(&mut engine, &mut ctl, unit, REG_DMADSTADDR, 0x2000);
    write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSIZE0, 16);
    write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSIZE0 + 1, 4);
    write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSRCSTRIDE0, 32);
    write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERDSTSTRIDE0, 16);
    write_reg(&mut engine, &mut ctl, unit, REG_DMACTRL, CTRL_DIM_2D | CTRL_START);

    let mut out = [0u8; 64];
    ctl.load(0x2000, 64, &mut out, UnitId::External);

    for row in 0..4usize {
        let expected = &src[row * 32..row * 32 + 16];
        assert_eq!(&out[row * 16..row * 16 + 16], expected);
    }
}
