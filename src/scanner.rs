use std::collections::HashMap;
use std::time::Instant;

use btleplug::api::{Central as _, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, PeripheralId};
use futures::StreamExt as _;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::messages::{ButtonId, Sighting};

/// Bluetooth SIG company identifier Apple uses for iBeacon adverts.
const IBEACON_COMPANY_ID: u16 = 0x004C;
const IBEACON_PREFIX: [u8; 2] = [0x02, 0x15];
const IBEACON_LEN: usize = 23;

/// Button payload carried in an iBeacon advert.
#[derive(Debug, PartialEq, Eq)]
pub struct ButtonAdvert {
    pub id: ButtonId,
    pub pressed: bool,
}

/// Decode iBeacon manufacturer data. The UUID and major identify the button and
/// bit 0 of the minor is the button state.
pub fn decode_ibeacon(manufacturer_data: &HashMap<u16, Vec<u8>>) -> Option<ButtonAdvert> {
    let data = manufacturer_data.get(&IBEACON_COMPANY_ID)?;
    if data.len() < IBEACON_LEN || data[..2] != IBEACON_PREFIX {
        return None;
    }

    let kind = Uuid::from_slice(&data[2..18]).ok()?;
    let major = u16::from_be_bytes([data[18], data[19]]);
    let minor = u16::from_be_bytes([data[20], data[21]]);

    Some(ButtonAdvert {
        id: ButtonId::new(kind, major),
        pressed: minor & 0x01 == 1,
    })
}

pub struct Scanner {
    adapter: Adapter,
}

impl Scanner {
    pub fn new(adapter: Adapter) -> Self {
        Scanner { adapter }
    }

    /// Scan until the adapter's event stream ends or the receiving side of
    /// `tx` goes away.
    pub async fn run(self, tx: mpsc::Sender<Sighting>) -> anyhow::Result<()> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("BLE scan started");

        while let Some(event) = events.next().await {
            let (id, manufacturer_data) = match event {
                CentralEvent::ManufacturerDataAdvertisement {
                    id,
                    manufacturer_data,
                } => (id, manufacturer_data),
                _ => continue,
            };

            let Some(advert) = decode_ibeacon(&manufacturer_data) else {
                continue;
            };

            let rssi = match self.rssi(&id).await {
                Ok(Some(rssi)) => rssi,
                Ok(None) => {
                    warn!("Dropping advert from button {}: no RSSI reported", advert.id);
                    continue;
                }
                Err(err) => {
                    warn!("Unable to read properties of {:?}: {:?}", id, err);
                    continue;
                }
            };

            let sighting = Sighting {
                id: advert.id,
                pressed: advert.pressed,
                rssi,
                seen_at: Instant::now(),
            };
            debug!("Beacon sighting: {:?}", sighting);

            if tx.send(sighting).await.is_err() {
                debug!("Sighting receiver closed");
                break;
            }
        }

        info!("BLE scan finished");
        if let Err(err) = self.adapter.stop_scan().await {
            warn!("Error stopping BLE scan: {:?}", err);
        }
        Ok(())
    }

    async fn rssi(&self, id: &PeripheralId) -> Result<Option<i16>, btleplug::Error> {
        let peripheral = self.adapter.peripheral(id).await?;
        let properties = peripheral.properties().await?;
        Ok(properties.and_then(|p| p.rssi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advert(major: u16, minor: u16) -> HashMap<u16, Vec<u8>> {
        let mut data = IBEACON_PREFIX.to_vec();
        data.extend_from_slice(Uuid::from_u128(0x1234).as_bytes());
        data.extend_from_slice(&major.to_be_bytes());
        data.extend_from_slice(&minor.to_be_bytes());
        data.push(0xC5);
        HashMap::from([(IBEACON_COMPANY_ID, data)])
    }

    #[test]
    fn test_decode_button_advert() {
        assert_eq!(
            decode_ibeacon(&advert(42, 0x0101)),
            Some(ButtonAdvert {
                id: ButtonId::new(Uuid::from_u128(0x1234), 42),
                pressed: true,
            })
        );
        assert!(!decode_ibeacon(&advert(42, 0x0100)).unwrap().pressed);
    }

    #[test]
    fn test_ignores_other_manufacturers() {
        let mut data = advert(1, 1);
        let payload = data.remove(&IBEACON_COMPANY_ID).unwrap();
        data.insert(0x018E, payload);
        assert_eq!(decode_ibeacon(&data), None);
    }

    #[test]
    fn test_ignores_truncated_or_non_ibeacon_payloads() {
        let mut truncated = advert(1, 1);
        truncated.get_mut(&IBEACON_COMPANY_ID).unwrap().truncate(20);
        assert_eq!(decode_ibeacon(&truncated), None);

        let mut wrong_prefix = advert(1, 1);
        wrong_prefix.get_mut(&IBEACON_COMPANY_ID).unwrap()[0] = 0x10;
        assert_eq!(decode_ibeacon(&wrong_prefix), None);
    }
}
