use rrrc_protocol::commands::{self, UpdateInit};
use rrrc_protocol::{MAX_REQUEST_LEN, Op, encode_request};

fn main() {
    let init = UpdateInit {
        size: 300,
        crc: 0xDEAD_BEEF,
    };
    let requests: [(Op, u8, &[u8]); 4] = [
        (Op::Start, commands::PING, &[]),
        (Op::Start, commands::READ_HW_VERSION, &[]),
        (Op::GetResult, commands::READ_HW_VERSION, &[]),
        (Op::Start, commands::UPDATE_INIT, &init.encode()),
    ];
    let mut raw = [0u8; MAX_REQUEST_LEN];
    for (op, cmd, payload) in requests {
        let len = encode_request(op, cmd, payload, &mut raw).unwrap();
        println!("{:?} {:<20} {:02x?}", op, commands::name(cmd), &raw[..len]);
    }
}
