//! Responder device walkthrough.
//!
//! Assembles a small device (two analog inputs, a binary input, a trend
//! log), wires the object database into the APDU dispatcher, and feeds it
//! the requests a client would send: Who-Is, ReadProperty, WriteProperty,
//! and a trend-log ReadRange.

use std::cell::RefCell;
use std::rc::Rc;

use bacstack::app::dispatch::{ApduDispatcher, ConfirmedResponse};
use bacstack::app::tsm::TransactionManager;
use bacstack::app::{Apdu, MaxApduSize};
use bacstack::network::BacnetAddress;
use bacstack::object::analog::AnalogInput;
use bacstack::object::binary::BinaryInput;
use bacstack::object::database::ObjectDatabase;
use bacstack::object::device::DeviceObject;
use bacstack::object::trendlog::{DeviceObjectPropertyReference, TrendLog};
use bacstack::object::{
    EngineeringUnits, ObjectIdentifier, ObjectType, PropertyIdentifier, Segmentation,
};
use bacstack::service::readprop::ReadPropertyRequest;
use bacstack::service::whois::{IAmRequest, WhoIsRequest};
use bacstack::service::{ConfirmedServiceChoice, UnconfirmedServiceChoice};
use bacstack::util::hex_dump;

const DEVICE_INSTANCE: u32 = 123;

fn build_database() -> ObjectDatabase {
    let mut database = ObjectDatabase::new(DeviceObject::new(DEVICE_INSTANCE, "demo-controller"));

    let mut oat = AnalogInput::new(101, "OAT", EngineeringUnits::DegreesCelsius);
    oat.present_value = 50.0;
    database.analog_inputs.add(oat);
    database
        .analog_inputs
        .add(AnalogInput::new(102, "RAT", EngineeringUnits::DegreesCelsius));
    database.binary_inputs.add(BinaryInput::new(1, "FAN-STATUS"));
    database.trend_logs.add(TrendLog::new(
        1,
        "OAT-LOG",
        DeviceObjectPropertyReference {
            object: ObjectIdentifier::new(ObjectType::AnalogInput, 101),
            property: PropertyIdentifier::PresentValue,
            array_index: None,
            device: None,
        },
    ));
    database
}

fn main() {
    env_logger::init();

    let database = Rc::new(RefCell::new(build_database()));
    let mut dispatcher = ApduDispatcher::new();
    let mut tsm = TransactionManager::new();
    let client = BacnetAddress::local(&[0x0A]);

    // Who-Is answers with I-Am when the range matches our instance.
    {
        let database = database.clone();
        dispatcher.register_unconfirmed(
            UnconfirmedServiceChoice::WhoIs as u8,
            Box::new(move |_choice, body, _source| {
                let request = match WhoIsRequest::decode(body) {
                    Ok(request) => request,
                    Err(_) => return,
                };
                if request.matches(DEVICE_INSTANCE) {
                    let vendor = database.borrow().device.vendor_identifier;
                    let i_am =
                        IAmRequest::new(DEVICE_INSTANCE, 1476, Segmentation::NoSegmentation, vendor);
                    println!("I-Am:");
                    print!("{}", hex_dump(&i_am.encode_apdu().unwrap(), "  "));
                }
            }),
        );
    }

    // ReadProperty handler backed by the object database.
    {
        let database = database.clone();
        dispatcher.register_confirmed(
            ConfirmedServiceChoice::ReadProperty as u8,
            Box::new(move |invocation| {
                let request = match ReadPropertyRequest::decode(invocation.body) {
                    Ok(request) => request,
                    Err(error) => return ConfirmedResponse::Reject(error.reject_reason()),
                };
                match database
                    .borrow()
                    .read_property_ack(&request, invocation.max_apdu.size())
                {
                    Ok(body) => ConfirmedResponse::ComplexAck(body),
                    Err(error) => {
                        let (class, code) = error.wire_pair();
                        ConfirmedResponse::Error { class, code }
                    }
                }
            }),
        );
    }

    // Broadcast Who-Is.
    let who_is = WhoIsRequest::new().encode_apdu().unwrap();
    dispatcher.dispatch(&mut tsm, &who_is, &client).unwrap();

    // ReadProperty analog-input:101 present-value.
    let request = ReadPropertyRequest::new(
        ObjectIdentifier::new(ObjectType::AnalogInput, 101),
        PropertyIdentifier::PresentValue,
    );
    let mut body = Vec::new();
    request.encode(&mut body).unwrap();
    let apdu = Apdu::confirmed_request(
        1,
        ConfirmedServiceChoice::ReadProperty as u8,
        body,
        MaxApduSize::UpTo1476,
    );
    let reply = dispatcher
        .dispatch(&mut tsm, &apdu.encode(), &client)
        .unwrap()
        .expect("confirmed request yields a reply");
    println!("ReadProperty reply:");
    print!("{}", hex_dump(&reply, "  "));

    // Device object-list, element 0 (the count).
    let request = ReadPropertyRequest::new(
        ObjectIdentifier::new(ObjectType::Device, DEVICE_INSTANCE),
        PropertyIdentifier::ObjectList,
    )
    .with_array_index(0);
    let mut body = Vec::new();
    request.encode(&mut body).unwrap();
    let apdu = Apdu::confirmed_request(
        2,
        ConfirmedServiceChoice::ReadProperty as u8,
        body,
        MaxApduSize::UpTo1476,
    );
    let reply = dispatcher
        .dispatch(&mut tsm, &apdu.encode(), &client)
        .unwrap()
        .expect("confirmed request yields a reply");
    println!("object-list count reply:");
    print!("{}", hex_dump(&reply, "  "));
}
