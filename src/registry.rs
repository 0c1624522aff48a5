//! Vehicle registry: plate to owner lookup
//!
//! A static RTO dataset. Lookups are synchronous and never fail; a miss
//! yields all-null owner fields.

use crate::dedup::normalize_plate;

/// A registered vehicle
#[derive(Debug, Clone, Copy)]
struct RtoRecord {
    plate: &'static str,
    owner_name: &'static str,
    address: &'static str,
    vehicle_model: &'static str,
    phone: &'static str,
    email: &'static str,
}

/// Owner fields resolved for a plate; all `None` on a registry miss
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerDetails {
    pub owner_name: Option<String>,
    pub owner_address: Option<String>,
    pub owner_phone: Option<String>,
    pub owner_email: Option<String>,
    pub vehicle_model: Option<String>,
}

const RTO_RECORDS: &[RtoRecord] = &[
    RtoRecord {
        plate: "MH12KN4567",
        owner_name: "Sandeep Balabantaray",
        address: "Flat 203, Sai Heights, Baner, Pune, Maharashtra",
        vehicle_model: "Honda CB Shine",
        phone: "9876501234",
        email: "sandeepcool2036@gmail.com",
    },
    RtoRecord {
        plate: "MH12KG3456",
        owner_name: "Purnima Jagganath Sahoo",
        address: "Kothrud, Pune, Maharashtra",
        vehicle_model: "Hero Splendor",
        phone: "9876512340",
        email: "purnimajagganathsahoo@gmail.com",
    },
    RtoRecord {
        plate: "MP04GB5586",
        owner_name: "Meet Bikhani",
        address: "B-104, Lajpat Nagar, New Delhi",
        vehicle_model: "Hyundai i20 Sportz",
        phone: "9876523401",
        email: "meetbikhani2022@vitbhopal.ac.in",
    },
    RtoRecord {
        plate: "MH12DE1234",
        owner_name: "Arjun Mehra",
        address: "12, Indiranagar, Bengaluru, Karnataka",
        vehicle_model: "Kia Seltos HTK",
        phone: "9876534012",
        email: "sandeepcool2036@gmail.com",
    },
    RtoRecord {
        plate: "KA65JK5678",
        owner_name: "Neha Patel",
        address: "4-A, Navrang Society, Ahmedabad, Gujarat",
        vehicle_model: "Honda City VX",
        phone: "9876540123",
        email: "perfectpower56@gmail.com",
    },
    RtoRecord {
        plate: "TN10JK7890",
        owner_name: "Karthik Raman",
        address: "23, T Nagar, Chennai, Tamil Nadu",
        vehicle_model: "TVS Apache RTR 160",
        phone: "9876556789",
        email: "karthik.raman@example.com",
    },
    RtoRecord {
        plate: "RJ14LM4321",
        owner_name: "Simran Kaur",
        address: "Plot 9, Malviya Nagar, Jaipur, Rajasthan",
        vehicle_model: "Mahindra Scorpio S5",
        phone: "9876567890",
        email: "simran.kaur@example.com",
    },
    RtoRecord {
        plate: "UP16NP8765",
        owner_name: "Abhishek Yadav",
        address: "House 77, Sector 12, Noida, Uttar Pradesh",
        vehicle_model: "Royal Enfield Classic 350",
        phone: "9876578901",
        email: "abhishek.yadav@example.com",
    },
    RtoRecord {
        plate: "HR26QR6543",
        owner_name: "Pooja Singh",
        address: "H-55, DLF Phase 3, Gurugram, Haryana",
        vehicle_model: "Honda Activa 6G",
        phone: "9876589012",
        email: "pooja.singh@example.com",
    },
    RtoRecord {
        plate: "WB02ST2109",
        owner_name: "Anirban Chatterjee",
        address: "Flat 5B, Salt Lake, Kolkata, West Bengal",
        vehicle_model: "Tata Nexon XZ",
        phone: "9876590123",
        email: "anirban.c@example.com",
    },
    RtoRecord {
        plate: "MH01UV9988",
        owner_name: "Riya Kulkarni",
        address: "201, Lake View Apartments, Powai, Mumbai, Maharashtra",
        vehicle_model: "Maruti Suzuki Baleno",
        phone: "9876601234",
        email: "riya.kulkarni@example.com",
    },
    RtoRecord {
        plate: "KL07WX5566",
        owner_name: "Aditya Nair",
        address: "12/45, Panampilly Nagar, Kochi, Kerala",
        vehicle_model: "Hyundai Creta SX",
        phone: "9876612345",
        email: "aditya.nair@example.com",
    },
    RtoRecord {
        plate: "CG04YZ3344",
        owner_name: "Shruti Deshmukh",
        address: "Near Civil Lines, Raipur, Chhattisgarh",
        vehicle_model: "Hero Splendor Plus",
        phone: "9876623456",
        email: "shruti.deshmukh@example.com",
    },
    RtoRecord {
        plate: "AP09AB7788",
        owner_name: "Varun Reddy",
        address: "Plot 11, Madhapur, Hyderabad, Telangana",
        vehicle_model: "Suzuki Access 125",
        phone: "9876634567",
        email: "varun.reddy@example.com",
    },
    RtoRecord {
        plate: "BR01CD2233",
        owner_name: "Rahul Kumar",
        address: "Lane 3, Boring Road, Patna, Bihar",
        vehicle_model: "Tata Punch Adventure",
        phone: "9876645678",
        email: "rahul.kumar@example.com",
    },
    RtoRecord {
        plate: "PB10EF6677",
        owner_name: "Gurpreet Singh",
        address: "Green Enclave, Ludhiana, Punjab",
        vehicle_model: "Hyundai Venue S",
        phone: "9876656789",
        email: "gurpreet.singh@example.com",
    },
    RtoRecord {
        plate: "UK07GH1122",
        owner_name: "Megha Joshi",
        address: "Rajpur Road, Dehradun, Uttarakhand",
        vehicle_model: "Honda Jazz VX",
        phone: "9876667890",
        email: "megha.joshi@example.com",
    },
    RtoRecord {
        plate: "OD02JK8899",
        owner_name: "Sourav Mishra",
        address: "Saheed Nagar, Bhubaneswar, Odisha",
        vehicle_model: "Yamaha FZ-S V3",
        phone: "9876678901",
        email: "sourav.mishra@example.com",
    },
    RtoRecord {
        plate: "AS01LM4455",
        owner_name: "Nikita Das",
        address: "Zoo Road, Guwahati, Assam",
        vehicle_model: "Maruti Suzuki Dzire VXi",
        phone: "9876689012",
        email: "nikita.das@example.com",
    },
    RtoRecord {
        plate: "JK01NP7789",
        owner_name: "Imran Khan",
        address: "Rajbagh, Srinagar, Jammu & Kashmir",
        vehicle_model: "Mahindra XUV300 W6",
        phone: "9876690123",
        email: "imran.khan@example.com",
    },
];

/// Resolve owner details for a plate
///
/// Comparison is on the normalized plate, so "MH 12 KN 4567" matches
/// "MH12KN4567". A miss returns all-`None` fields, never an error.
#[must_use]
pub fn lookup(plate: &str) -> OwnerDetails {
    if plate.is_empty() {
        return OwnerDetails::default();
    }

    let normalized = normalize_plate(plate);
    RTO_RECORDS
        .iter()
        .find(|r| normalize_plate(r.plate) == normalized)
        .map_or_else(OwnerDetails::default, |r| OwnerDetails {
            owner_name: Some(r.owner_name.to_string()),
            owner_address: Some(r.address.to_string()),
            owner_phone: Some(r.phone.to_string()),
            owner_email: Some(r.email.to_string()),
            vehicle_model: Some(r.vehicle_model.to_string()),
        })
}
