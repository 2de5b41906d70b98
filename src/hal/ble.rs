//! Bluedroid GATT server exposing the sensor characteristic.
//!
//! # Attribute table
//!
//! ```text
//! Sensor service     f28e76d6-...-fb30   primary
//! └── Sensor data    f28e76d6-...-fb31   Indicate, 4 bytes LE
//!     └── CCCD       0x2902              Read | Write
//! ```
//!
//! Registration is event driven: each step is started from the completion
//! event of the previous one. Stack events are forwarded to [`PeerEvents`];
//! [`EspIndicationTransport`] is the coordinator's view of the server.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use esp_idf_svc::bt::ble::gap::{AdvConfiguration, BleGapEvent, EspBleGap};
use esp_idf_svc::bt::ble::gatt::server::{ConnectionId, EspGatts, GattsEvent, TransferId};
use esp_idf_svc::bt::ble::gatt::{
    AutoResponse, GattCharacteristic, GattDescriptor, GattId, GattInterface, GattServiceId,
    GattStatus, Handle, Permission, Property,
};
use esp_idf_svc::bt::{Ble, BtDriver, BtStatus, BtUuid};
use esp_idf_svc::sys::{EspError, ESP_ERR_NO_MEM, ESP_FAIL};

use crate::config::{CCCD_UUID, DEVICE_NAME, SENSOR_CHAR_UUID, SENSOR_SERVICE_UUID};
use crate::error::TransportError;
use crate::events::PeerEvents;
use crate::hal::gpio::LedPin;
use crate::link::{AckHandle, AckStatus, IndicationTransport};
use crate::sample::SAMPLE_WIRE_LEN;
use crate::{link_debug, link_error, link_info, link_warn, LINK_LOG};

pub type LmBtDriver = BtDriver<'static, Ble>;
type LmBleGap = EspBleGap<'static, Ble, Arc<LmBtDriver>>;
type LmGatts = EspGatts<'static, Ble, Arc<LmBtDriver>>;

const APP_ID: u16 = 0;

/// Service, characteristic, descriptor (one handle each).
const SERVICE_HANDLE_COUNT: u16 = 4;

/// Advertising flags: general discoverable, BR/EDR not supported.
const ADV_FLAGS: u8 = 0x06;

/// Handles learned during registration plus the current connection.
#[derive(Debug, Default)]
struct Attributes {
    gatt_if: Option<GattInterface>,
    service_handle: Option<Handle>,
    char_handle: Option<Handle>,
    cccd_handle: Option<Handle>,
    conn_id: Option<ConnectionId>,
}

/// GATT server owning the connection LED and the peer event glue.
pub struct SensorServer {
    gap: LmBleGap,
    gatts: LmGatts,
    attrs: Mutex<Attributes>,
    events: Mutex<PeerEvents<LedPin>>,
}

impl SensorServer {
    pub fn new(bt: Arc<LmBtDriver>, events: PeerEvents<LedPin>) -> Result<Arc<Self>, EspError> {
        Ok(Arc::new(Self {
            gap: EspBleGap::new(Arc::clone(&bt))?,
            gatts: EspGatts::new(bt)?,
            attrs: Mutex::new(Attributes::default()),
            events: Mutex::new(events),
        }))
    }

    /// Coordinator-side transport over this server.
    pub fn transport(self: &Arc<Self>) -> EspIndicationTransport {
        EspIndicationTransport {
            server: Arc::clone(self),
        }
    }

    /// Subscribe to stack events and register the GATT application.
    ///
    /// Service creation and advertising follow from the events.
    pub fn start(self: &Arc<Self>) -> Result<(), EspError> {
        let server = Arc::clone(self);
        self.gap.subscribe(move |event| {
            if let Err(err) = server.on_gap_event(event) {
                link_error!(LINK_LOG, "GAP event failed: {}", err);
            }
        })?;

        let server = Arc::clone(self);
        self.gatts.subscribe(move |(gatt_if, event)| {
            if let Err(err) = server.on_gatts_event(gatt_if, event) {
                link_error!(LINK_LOG, "GATTS event failed: {}", err);
            }
        })?;

        self.gatts.register_app(APP_ID)
    }

    fn attrs(&self) -> MutexGuard<'_, Attributes> {
        self.attrs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn events(&self) -> MutexGuard<'_, PeerEvents<LedPin>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_gap_event(&self, event: BleGapEvent) -> Result<(), EspError> {
        if let BleGapEvent::AdvertisingConfigured(status) = event {
            check_bt_status(status)?;
            self.gap.start_advertising()?;
            link_info!(LINK_LOG, "Advertising successfully started");
        }
        Ok(())
    }

    fn on_gatts_event(&self, gatt_if: GattInterface, event: GattsEvent) -> Result<(), EspError> {
        match event {
            GattsEvent::ServiceRegistered { status, app_id } => {
                check_gatt_status(status)?;
                if app_id == APP_ID {
                    self.create_service(gatt_if)?;
                }
            }
            GattsEvent::ServiceCreated {
                status,
                service_handle,
                ..
            } => {
                check_gatt_status(status)?;
                self.attrs().service_handle = Some(service_handle);
                self.gatts.start_service(service_handle)?;
                self.add_sensor_characteristic(service_handle)?;
            }
            GattsEvent::CharacteristicAdded {
                status,
                attr_handle,
                service_handle,
                char_uuid,
            } => {
                check_gatt_status(status)?;
                let ours = {
                    let mut attrs = self.attrs();
                    let ours = attrs.service_handle == Some(service_handle)
                        && char_uuid == BtUuid::uuid128(SENSOR_CHAR_UUID);
                    if ours {
                        attrs.char_handle = Some(attr_handle);
                    }
                    ours
                };
                if ours {
                    self.gatts.add_descriptor(
                        service_handle,
                        &GattDescriptor {
                            uuid: BtUuid::uuid16(CCCD_UUID),
                            permissions: Permission::Read | Permission::Write,
                        },
                    )?;
                }
            }
            GattsEvent::DescriptorAdded {
                status,
                attr_handle,
                descr_uuid,
                ..
            } => {
                check_gatt_status(status)?;
                if descr_uuid == BtUuid::uuid16(CCCD_UUID) {
                    self.attrs().cccd_handle = Some(attr_handle);
                    link_info!(LINK_LOG, "Sensor service registered");
                }
            }
            GattsEvent::PeerConnected { conn_id, .. } => {
                self.attrs().conn_id = Some(conn_id);
                self.events().on_connected(None);
            }
            GattsEvent::PeerDisconnected { reason, .. } => {
                self.attrs().conn_id = None;
                self.events().on_disconnected(reason as u8);
                self.gap.start_advertising()?;
            }
            GattsEvent::Write {
                conn_id,
                trans_id,
                handle,
                need_rsp,
                value,
                ..
            } => {
                self.on_write(gatt_if, conn_id, trans_id, handle, need_rsp, value)?;
            }
            GattsEvent::Confirm { status, .. } => {
                let status = match status {
                    GattStatus::Ok => AckStatus::Confirmed,
                    other => AckStatus::Failed(other as u8),
                };
                self.events().on_indication_done(status);
            }
            _ => (),
        }
        Ok(())
    }

    fn create_service(&self, gatt_if: GattInterface) -> Result<(), EspError> {
        self.attrs().gatt_if = Some(gatt_if);

        self.gap.set_device_name(DEVICE_NAME)?;
        self.gap.set_adv_conf(&AdvConfiguration {
            include_name: true,
            flag: ADV_FLAGS,
            service_uuid: Some(BtUuid::uuid128(SENSOR_SERVICE_UUID)),
            ..Default::default()
        })?;

        self.gatts.create_service(
            gatt_if,
            &GattServiceId {
                id: GattId {
                    uuid: BtUuid::uuid128(SENSOR_SERVICE_UUID),
                    inst_id: 0,
                },
                is_primary: true,
            },
            SERVICE_HANDLE_COUNT,
        )
    }

    fn add_sensor_characteristic(&self, service_handle: Handle) -> Result<(), EspError> {
        self.gatts.add_characteristic(
            service_handle,
            &GattCharacteristic {
                uuid: BtUuid::uuid128(SENSOR_CHAR_UUID),
                permissions: Permission::Read.into(),
                properties: Property::Indicate.into(),
                max_len: SAMPLE_WIRE_LEN,
                auto_rsp: AutoResponse::ByApp,
            },
            &[],
        )
    }

    fn on_write(
        &self,
        gatt_if: GattInterface,
        conn_id: ConnectionId,
        trans_id: TransferId,
        handle: Handle,
        need_rsp: bool,
        value: &[u8],
    ) -> Result<(), EspError> {
        let cccd_handle = self.attrs().cccd_handle;

        let status = match value {
            [lo, hi] if Some(handle) == cccd_handle => {
                self.events().on_ccc_write(u16::from_le_bytes([*lo, *hi]));
                GattStatus::Ok
            }
            _ if Some(handle) == cccd_handle => GattStatus::InvalidAttrLen,
            _ => {
                link_debug!(LINK_LOG, "Write to unknown handle {}", handle);
                GattStatus::WriteNotPermit
            }
        };

        if need_rsp {
            self.gatts
                .send_response(gatt_if, conn_id, trans_id, status, None)?;
        }
        Ok(())
    }
}

fn check_gatt_status(status: GattStatus) -> Result<(), EspError> {
    if matches!(status, GattStatus::Ok) {
        Ok(())
    } else {
        link_warn!(LINK_LOG, "GATT status {:?}", status);
        Err(EspError::from_infallible::<ESP_FAIL>())
    }
}

fn check_bt_status(status: BtStatus) -> Result<(), EspError> {
    if matches!(status, BtStatus::Success) {
        Ok(())
    } else {
        link_warn!(LINK_LOG, "BT status {:?}", status);
        Err(EspError::from_infallible::<ESP_FAIL>())
    }
}

/// [`IndicationTransport`] over the Bluedroid GATT server.
pub struct EspIndicationTransport {
    server: Arc<SensorServer>,
}

impl IndicationTransport for EspIndicationTransport {
    fn bind(&mut self, completion: AckHandle) {
        self.server.events().bind_completion(completion);
    }

    fn indicate(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let (gatt_if, conn_id, char_handle) = {
            let attrs = self.server.attrs();
            match (attrs.gatt_if, attrs.char_handle, attrs.conn_id) {
                (Some(gatt_if), Some(handle), Some(conn_id)) => (gatt_if, conn_id, handle),
                (_, _, None) => return Err(TransportError::NotConnected),
                _ => return Err(TransportError::NotRegistered),
            }
        };

        self.server
            .gatts
            .indicate(gatt_if, conn_id, char_handle, payload)
            .map_err(|err| match err.code() {
                code if code == ESP_ERR_NO_MEM as i32 => TransportError::Busy,
                code => TransportError::Stack(code),
            })
    }
}
