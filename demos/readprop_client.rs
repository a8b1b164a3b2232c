//! ReadProperty client walkthrough.
//!
//! Builds the confirmed ReadProperty request a tool would send for
//! `analog-input:101 present-value` on device 123, shows the wire bytes,
//! and decodes a canned reply the way the client side would.
//!
//! Run with `RUST_LOG=debug` (or `BACNET_DEBUG=1`) for wire traces.

use bacstack::app::dispatch::ApduDispatcher;
use bacstack::app::tsm::TransactionManager;
use bacstack::app::{Apdu, MaxApduSize};
use bacstack::encoding::ApplicationValue;
use bacstack::network::{BacnetAddress, Npdu};
use bacstack::object::{ObjectIdentifier, ObjectType, PropertyIdentifier};
use bacstack::service::readprop::{ReadPropertyAck, ReadPropertyRequest};
use bacstack::service::ConfirmedServiceChoice;
use bacstack::util::hex_dump;

fn init_logging() {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("BACNET_DEBUG").map(|v| v == "1").unwrap_or(false) {
        builder.filter_level(log::LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

fn main() {
    init_logging();

    let peer = BacnetAddress::local(&[0xC0, 0xA8, 0x01, 0x17, 0xBA, 0xC0]);
    let mut tsm = TransactionManager::new();
    let mut dispatcher = ApduDispatcher::new();

    dispatcher.register_confirmed_ack(
        ConfirmedServiceChoice::ReadProperty as u8,
        Box::new(|invoke_id, body, _source| {
            let ack = ReadPropertyAck::decode(body).expect("well-formed ack");
            let (value, _) = ApplicationValue::decode(ack.value).expect("tagged value");
            println!(
                "invoke {} -> {:?} instance {} = {:?}",
                invoke_id,
                ack.object_identifier.object_type,
                ack.object_identifier.instance,
                value
            );
        }),
    );

    // Build the request body and bind an invoke-id to the transaction.
    let request = ReadPropertyRequest::new(
        ObjectIdentifier::new(ObjectType::AnalogInput, 101),
        PropertyIdentifier::PresentValue,
    );
    let mut body = Vec::new();
    request.encode(&mut body).expect("encode request");

    let invoke_id = tsm
        .allocate(&peer, ConfirmedServiceChoice::ReadProperty as u8, &body)
        .expect("free invoke id");
    let apdu = Apdu::confirmed_request(
        invoke_id,
        ConfirmedServiceChoice::ReadProperty as u8,
        body,
        MaxApduSize::UpTo1476,
    );

    let mut frame = Npdu::for_destination(&peer, true).encode();
    frame.extend_from_slice(&apdu.encode());
    println!("request NPDU+APDU:");
    print!("{}", hex_dump(&frame, "  "));

    // A server would answer with a ComplexAck carrying Real(50.0).
    let mut ack_body = Vec::new();
    ReadPropertyAck::encode(
        &mut ack_body,
        request.object_identifier,
        request.property_identifier,
        None,
        &[0x44, 0x42, 0x48, 0x00, 0x00],
    )
    .expect("encode ack");
    let reply = Apdu::complex_ack(invoke_id, ConfirmedServiceChoice::ReadProperty as u8, ack_body);

    dispatcher
        .dispatch(&mut tsm, &reply.encode(), &peer)
        .expect("dispatch reply");

    assert!(tsm.invoke_id_free(invoke_id));
    println!("transaction complete");
}
