use refsi_accel::Accelerator;
use refsi_addr::UnitId;
use refsi_cmp::regs::{self, CmpOpcode};
use refsi_cmp::{CommandProcessor, CommandRequest, HartLocalLayout, IoRanges};
use refsi_mem::{MemoryController, RamDevice};

fn encode_i(opcode: u32, rd: u32, funct3: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

#[test]
fn run_instances_via_command_buffer_launches_every_instance() {
    let mut mem = MemoryController::new();
    mem.add(0x1000, Box::new(RamDevice::new(0x100))).unwrap();
    mem.add(0x2000, Box::new(RamDevice::new(0x100))).unwrap();
    mem.add(0x4000, Box::new(RamDevice::new(0x100))).unwrap();

    // jalr x0, 0(x1): return to ra immediately, for every launched instance.
    let code = encode_i(0x67, 0, 0, 1, 0);
    mem.store(0x1000, 4, &code.to_le_bytes(), UnitId::External);

    // Build the RUN_INSTANCES command buffer directly in device memory
    // before handing the controller over to the command processor.
    let buf_addr = 0x4000u64;
    let words: [u64; 9] = [
        regs::encode_header(CmpOpcode::WriteReg64, 1, regs::CMP_REG_ENTRY_PT_FN as u32),
        0x1000,
        regs::encode_header(CmpOpcode::WriteReg64, 1, regs::CMP_REG_STACK_TOP as u32),
        0x2000,
        regs::encode_header(CmpOpcode::WriteReg64, 1, regs::CMP_REG_RETURN_ADDR as u32),
        0x2000, // sentinel used only as ra; the breakpoint fires on re-entry
        regs::encode_header(CmpOpcode::RunInstances, 1, 2), // max_harts=2, no extra args
        4,                                                  // num_instances
        regs::encode_header(CmpOpcode::Finish, 0, 0),
    ];
    for (i, w) in words.iter().enumerate() {
        let addr = buf_addr + (i as u64) * 8;
        assert!(mem.store(addr, 8, &w.to_le_bytes(), UnitId::External));
    }

    let mut accel = Accelerator::new();
    accel.set_num_harts(2);
    let cmp = CommandProcessor::new(
        mem,
        accel,
        Vec::new(),
        HartLocalLayout { base: 0x8000, stride: 0x100 },
        IoRanges { dma_io_base: 0xffff_0000, perf_io_base: 0xffff_8000 },
    );

    cmp.enqueue_request(CommandRequest {
        command_buffer_addr: buf_addr,
        command_buffer_size: (words.len() as u64) * 8,
    });
    cmp.wait_empty_queue();

    assert_eq!(cmp.register(regs::CMP_REG_ENTRY_PT_FN), 0x1000);
}
